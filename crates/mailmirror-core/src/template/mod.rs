//! Templated bulk sending.
//!
//! A template body carries `<!name!>` placeholders. Each recipient supplies
//! values for them; recipients with identical values are grouped and receive
//! one shared, rendered message.

mod group;
mod model;
mod outgoing;
mod placeholder;

pub use group::{
    DispatchResult, GroupRecipient, PlannedSend, RecipientGroup, fingerprint, group_recipients,
    plan_grouped_send, send_grouped,
};
pub use model::{
    BulletStyle, Tag, TagKind, TagValue, TagValues, TemplateMessage, TemplateRecipient,
};
pub use outgoing::OutgoingMessage;
pub use placeholder::{effective_tags, extract_tag_names, render_body, render_value};

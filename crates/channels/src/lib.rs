//! Email channel for drips: template rendering, html post-processing,
//! message composition, and the transports messages are submitted through.

pub mod email;
pub mod inline;
pub mod message;
pub mod templates;

pub use email::{ConsoleTransport, MailTransport, MemoryTransport};
pub use inline::{CssInliner, HtmlTransform};
pub use message::EmailMessage;
pub use templates::{RenderContext, TemplateEngine, TemplateRenderer};

//! Announcement rendering seam.
//!
//! Template text and button construction are consumed by the engine as
//! a pure function of event data and account preferences. The default
//! implementation does plain placeholder substitution; richer
//! formatting lives behind the same trait.

use crate::models::{Account, AnnouncementButton, RenderedAnnouncement, StreamEvent};

const DEFAULT_TEMPLATE: &str = "\u{1F534} {channel} is live: {title}";
const DEFAULT_BUTTON_LABEL: &str = "Watch stream";

pub trait AnnouncementRenderer: Send + Sync {
    fn render(&self, account: &Account, event: &StreamEvent) -> RenderedAnnouncement;

    /// One-line per-session summary for the streamer's DM.
    fn render_summary(&self, account: &Account, delivered: usize, total: usize) -> String {
        format!(
            "Announced {} to {}/{} destinations",
            account.channel_name, delivered, total
        )
    }
}

/// Placeholder-substitution renderer: `{channel}`, `{title}`,
/// `{category}`, `{viewers}`.
pub struct TemplateRenderer;

impl TemplateRenderer {
    fn substitute(template: &str, account: &Account, event: &StreamEvent) -> String {
        template
            .replace("{channel}", &account.channel_name)
            .replace("{title}", event.title.as_deref().unwrap_or("(no title)"))
            .replace("{category}", event.category.as_deref().unwrap_or(""))
            .replace(
                "{viewers}",
                &event
                    .viewer_count
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            )
    }
}

impl AnnouncementRenderer for TemplateRenderer {
    fn render(&self, account: &Account, event: &StreamEvent) -> RenderedAnnouncement {
        let template = account.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let text = Self::substitute(template, account, event);

        let buttons = vec![AnnouncementButton {
            label: account
                .button_label
                .clone()
                .unwrap_or_else(|| DEFAULT_BUTTON_LABEL.to_string()),
            url: account.stream_url.clone(),
        }];

        RenderedAnnouncement { text, buttons }
    }
}

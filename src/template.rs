//! Message rendering and size-bounded splitting.
//!
//! Templates are rendered with Tera against the serialized [`AlertData`].
//! Built-in templates are always registered; files listed in the
//! configuration are added under their file name and may shadow a built-in.

use crate::core::AlertData;
use crate::error::NotifyError;
use std::ops::Range;
use std::path::PathBuf;
use tera::{Context, Tera};
use tracing::warn;

pub const DEFAULT_TEXT: &str = "default.text";
pub const DEFAULT_SUBJECT: &str = "default.subject";
pub const DEFAULT_HTML: &str = "default.html";

const DEFAULT_TEXT_TEMPLATE: &str = r#"{% for alert in alerts -%}
[{{ alert.status | upper }}] {{ alert.labels.alertname | default(value="alert") }}
{% for key, value in alert.labels %}{% if key != "alertname" %}{{ key }}={{ value }} {% endif %}{% endfor %}
{% if alert.annotations.message %}{{ alert.annotations.message }}
{% elif alert.annotations.summary %}{{ alert.annotations.summary }}
{% endif %}
{% endfor %}"#;

const DEFAULT_SUBJECT_TEMPLATE: &str = r#"[{{ status | upper }}:{{ alerts | length }}]{% if commonLabels.alertname %} {{ commonLabels.alertname }}{% endif %}"#;

const DEFAULT_HTML_TEMPLATE: &str = r#"<html><body>
{% for alert in alerts -%}
<h3>[{{ alert.status | upper }}] {{ alert.labels.alertname | default(value="alert") }}</h3>
<table>
{% for key, value in alert.labels %}<tr><td>{{ key }}</td><td>{{ value }}</td></tr>
{% endfor %}</table>
{% if alert.annotations.message %}<p>{{ alert.annotations.message }}</p>
{% elif alert.annotations.summary %}<p>{{ alert.annotations.summary }}</p>
{% endif %}
{% endfor %}</body></html>"#;

/// One rendered message and the alert records it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub text: String,
    /// Indices into the `alerts` of the data that was split.
    pub range: Range<usize>,
}

/// Named templates available to every notifier.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Builds the engine from the built-in templates plus `files`.
    pub fn new(files: &[PathBuf]) -> Result<Self, NotifyError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (DEFAULT_TEXT, DEFAULT_TEXT_TEMPLATE),
            (DEFAULT_SUBJECT, DEFAULT_SUBJECT_TEMPLATE),
            (DEFAULT_HTML, DEFAULT_HTML_TEMPLATE),
        ])?;

        let named: Vec<(PathBuf, Option<String>)> = files
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                (path.clone(), name)
            })
            .collect();
        if !named.is_empty() {
            tera.add_template_files(named)?;
        }

        Ok(Self { tera })
    }

    #[cfg(test)]
    fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// Renders the named template against `data`.
    pub fn render(&self, name: &str, data: &AlertData) -> Result<String, NotifyError> {
        let context = Context::from_serialize(data)?;
        Ok(self.tera.render(name, &context)?)
    }

    /// Renders `data` into as few chunks as possible, each at most `max_bytes`.
    pub fn split(
        &self,
        data: &AlertData,
        max_bytes: usize,
        name: &str,
    ) -> Result<Vec<MessageChunk>, NotifyError> {
        split_with(data, max_bytes, |part| self.render(name, part))
    }
}

/// Greedily packs whole alert records into chunks of at most `max_bytes`.
///
/// `render` is called on sub-groups that keep the group-level labels of
/// `data`. A record whose own rendering exceeds `max_bytes` is emitted
/// alone rather than cut. Empty data yields no chunks.
pub fn split_with<F>(
    data: &AlertData,
    max_bytes: usize,
    mut render: F,
) -> Result<Vec<MessageChunk>, NotifyError>
where
    F: FnMut(&AlertData) -> Result<String, NotifyError>,
{
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut pending: Option<String> = None;

    while end < data.alerts.len() {
        let candidate = render(&data.slice(start..end + 1))?;
        if candidate.len() <= max_bytes {
            pending = Some(candidate);
            end += 1;
            continue;
        }

        match pending.take() {
            Some(text) => {
                chunks.push(MessageChunk {
                    text,
                    range: start..end,
                });
                start = end;
            }
            None => {
                warn!(
                    size = candidate.len(),
                    max_bytes, "Single alert exceeds the message size limit, sending it alone"
                );
                chunks.push(MessageChunk {
                    text: candidate,
                    range: start..end + 1,
                });
                end += 1;
                start = end;
            }
        }
    }

    if let Some(text) = pending {
        chunks.push(MessageChunk {
            text,
            range: start..end,
        });
    }

    Ok(chunks)
}

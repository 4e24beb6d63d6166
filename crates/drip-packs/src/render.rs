use std::collections::HashMap;
use std::sync::Arc;

use drip_core::error::Result;
use drip_core::types::{StepDescriptor, Subscription};

/// A step turned into a sendable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Per-pack rendering strategy.
pub trait Renderer: Send + Sync {
    fn render(&self, subscription: &Subscription, step: &StepDescriptor) -> Result<RenderedEmail>;
}

/// Default renderer: blank-line separated paragraphs, HTML-escaped.
#[derive(Debug, Default, Clone)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, _subscription: &Subscription, step: &StepDescriptor) -> Result<RenderedEmail> {
        let html = step
            .body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(RenderedEmail {
            subject: step.subject.clone(),
            html,
            text: step.body.trim().to_string(),
        })
    }
}

/// Renderers selected by pack key, falling back to a default.
#[derive(Clone)]
pub struct RendererSet {
    default: Arc<dyn Renderer>,
    by_pack: HashMap<String, Arc<dyn Renderer>>,
}

impl Default for RendererSet {
    fn default() -> Self {
        Self::new(Arc::new(PlainRenderer))
    }
}

impl RendererSet {
    pub fn new(default: Arc<dyn Renderer>) -> Self {
        Self {
            default,
            by_pack: HashMap::new(),
        }
    }

    pub fn with_pack(mut self, pack_key: impl Into<String>, renderer: Arc<dyn Renderer>) -> Self {
        self.by_pack.insert(pack_key.into(), renderer);
        self
    }

    pub fn for_pack(&self, pack_key: &str) -> &dyn Renderer {
        self.by_pack
            .get(pack_key)
            .map(|r| r.as_ref())
            .unwrap_or(self.default.as_ref())
    }

    pub fn render(&self, subscription: &Subscription, step: &StepDescriptor) -> Result<RenderedEmail> {
        self.for_pack(&step.pack_key).render(subscription, step)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

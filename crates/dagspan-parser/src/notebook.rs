//! HTML duplicates of logged notebooks.

use crate::extract::Artifact;
use dagspan_core::Payload;
use serde::Deserialize;
use std::path::Path;

const NOTEBOOK_EXTENSION: &str = ".ipynb";

/// Converts notebook JSON into an HTML page.
pub trait NotebookRenderer {
    fn render(&self, notebook_json: &str) -> Result<String, serde_json::Error>;
}

#[derive(Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    #[serde(default)]
    cell_type: String,
    #[serde(default)]
    source: MultilineText,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
struct Output {
    #[serde(default)]
    text: Option<MultilineText>,
    #[serde(default)]
    data: Option<OutputData>,
}

#[derive(Deserialize)]
struct OutputData {
    #[serde(rename = "text/plain", default)]
    text_plain: Option<MultilineText>,
}

/// Notebook text fields are either one string or a list of lines.
#[derive(Deserialize)]
#[serde(untagged)]
enum MultilineText {
    One(String),
    Lines(Vec<String>),
}

impl Default for MultilineText {
    fn default() -> Self {
        MultilineText::One(String::new())
    }
}

impl MultilineText {
    fn joined(&self) -> String {
        match self {
            MultilineText::One(s) => s.clone(),
            MultilineText::Lines(lines) => lines.concat(),
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders cell sources and their text outputs as escaped `<pre>` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainHtmlRenderer;

impl NotebookRenderer for PlainHtmlRenderer {
    fn render(&self, notebook_json: &str) -> Result<String, serde_json::Error> {
        let notebook: Notebook = serde_json::from_str(notebook_json)?;

        let mut html = String::from("<!DOCTYPE html>\n<html>\n<body>\n");
        for cell in &notebook.cells {
            html.push_str(&format!(
                "<pre class=\"cell {}\">{}</pre>\n",
                escape_html(&cell.cell_type),
                escape_html(&cell.source.joined())
            ));
            for output in &cell.outputs {
                let text = output
                    .text
                    .as_ref()
                    .or_else(|| output.data.as_ref().and_then(|d| d.text_plain.as_ref()));
                if let Some(text) = text {
                    html.push_str(&format!(
                        "<pre class=\"output\">{}</pre>\n",
                        escape_html(&text.joined())
                    ));
                }
            }
        }
        html.push_str("</body>\n</html>\n");
        Ok(html)
    }
}

/// `reports/nb.ipynb` → `reports/nb.html`.
fn html_name(notebook_name: &str) -> String {
    Path::new(notebook_name)
        .with_extension("html")
        .to_string_lossy()
        .into_owned()
}

/// Inserts an HTML rendering before every text `.ipynb` artifact.
///
/// A notebook that fails to render is kept as is, without a duplicate.
pub fn add_html_notebook_artifacts(
    artifacts: Vec<Artifact>,
    renderer: &dyn NotebookRenderer,
) -> Vec<Artifact> {
    let mut out = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        if let (true, Some(text)) = (
            artifact.name.ends_with(NOTEBOOK_EXTENSION),
            artifact.content.as_text(),
        ) {
            match renderer.render(text) {
                Ok(html) => out.push(Artifact {
                    name: html_name(&artifact.name),
                    type_name: "utf-8".into(),
                    content: Payload::Text(html),
                }),
                Err(e) => tracing::warn!(artifact = %artifact.name, "Could not render notebook: {}", e),
            }
        }
        out.push(artifact);
    }

    out
}

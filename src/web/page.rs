use std::fmt::Write;

use crate::color::ColorCommand;
use crate::dispatch::{DispatchResult, Outcome};

const QUICK_LINKS: [(&str, &str); 6] = [
    ("Red", "/?red=255&green=0&blue=0"),
    ("Green", "/?red=0&green=255&blue=0"),
    ("Blue", "/?red=0&green=0&blue=255"),
    ("Yellow", "/?color=255,255,0"),
    ("Magenta", "/?color=255,0,255"),
    ("Cyan", "/?color=0,255,255"),
];

#[derive(Debug, Default)]
pub(super) struct PageView {
    pub command: Option<ColorCommand>,
    pub result: Option<DispatchResult>,
    pub rejected: Option<String>,
}

pub(super) fn render(view: &PageView) -> String {
    let mut body = String::new();
    body.push_str("<html>\n<body>\n<h2>RGB Serial Bridge</h2>\n");

    if let (Some(cmd), Some(result)) = (view.command, &view.result) {
        let swatch = format!("rgb({},{},{})", cmd.red, cmd.green, cmd.blue);
        let (color, text) = match &result.outcome {
            Outcome::Sent => ("green", format!("&#10003; Color {} sent to device!", cmd)),
            Outcome::SentAfterReconnect => (
                "green",
                format!("&#10003; Color {} sent to device after reconnecting.", cmd),
            ),
            Outcome::Failed(reason) => (
                "red",
                format!("&#10007; Could not send {}: {}", cmd, escape_html(reason)),
            ),
        };
        let _ = writeln!(
            body,
            "<p style=\"color: {};\"><span style=\"background: {}\">&nbsp;&nbsp;&nbsp;&nbsp;</span> {}</p>",
            color, swatch, text
        );
        if !result.responses.is_empty() {
            body.push_str("<h3>Device says:</h3>\n<pre>");
            for line in &result.responses {
                let _ = writeln!(body, "{}", escape_html(line));
            }
            body.push_str("</pre>\n");
        }
    } else if let Some(reason) = &view.rejected {
        let _ = writeln!(
            body,
            "<p style=\"color: orange;\">No color sent: {}</p>",
            escape_html(reason)
        );
    }

    body.push_str("<h3>Test Color Control:</h3>\n");
    for (name, href) in QUICK_LINKS {
        let _ = writeln!(body, "<p><a href=\"{}\">{}</a></p>", href, name);
    }
    body.push_str("</body>\n</html>\n");
    body
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
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

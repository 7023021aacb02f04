//! Web front end: one form route served by tiny_http, one request at a time.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use anyhow::{anyhow, Result};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{error, info, warn};

use crate::config::ServerSettings;
use crate::pipeline::{VariantForm, VariantPipeline, DEFAULT_ONTOLOGY_TERM, DEFAULT_WINDOW_SIZE};
use crate::prediction_tools::alphagenome::OutputType;

/// Largest urlencoded form body accepted.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Bind the listener and serve until the process exits.
pub fn start_server(settings: &ServerSettings, pipeline: &VariantPipeline) -> Result<()> {
    let addr = settings.address();
    let server = Server::http(&addr).map_err(|e| anyhow!("Failed to start server on {}: {}", addr, e))?;
    info!("Server running at http://{}", addr);
    serve(&server, pipeline);
    Ok(())
}

pub fn serve(server: &Server, pipeline: &VariantPipeline) {
    for mut request in server.incoming_requests() {
        let response = handle_request(&mut request, pipeline);
        if let Err(e) = request.respond(response) {
            error!("Failed to send response: {}", e);
        }
    }
}

fn html_response(status: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body).with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        response = response.with_header(header);
    }
    response
}

fn handle_request(request: &mut Request, pipeline: &VariantPipeline) -> Response<Cursor<Vec<u8>>> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    info!("{} {}", request.method(), url);

    if path != "/" && path != "/index.html" {
        return Response::from_string("Not found").with_status_code(StatusCode(404));
    }

    let method = request.method().clone();
    match method {
        Method::Get => html_response(200, render_page(&HashMap::new(), None, None)),
        Method::Post => {
            if request.body_length().is_some_and(|len| len as u64 > MAX_BODY_BYTES) {
                return too_large();
            }
            let mut body = String::new();
            if let Err(e) = request.as_reader().take(MAX_BODY_BYTES + 1).read_to_string(&mut body) {
                warn!("Could not read request body: {}", e);
                return Response::from_string("Bad request").with_status_code(StatusCode(400));
            }
            if body.len() as u64 > MAX_BODY_BYTES {
                return too_large();
            }
            let fields = parse_form(&body);
            handle_submission(&fields, pipeline)
        }
        _ => Response::from_string("Method not allowed").with_status_code(StatusCode(405)),
    }
}

fn too_large() -> Response<Cursor<Vec<u8>>> {
    warn!("Rejecting form body larger than {} bytes", MAX_BODY_BYTES);
    Response::from_string("Payload too large").with_status_code(StatusCode(413))
}

fn handle_submission(fields: &HashMap<String, String>, pipeline: &VariantPipeline) -> Response<Cursor<Vec<u8>>> {
    let form = match VariantForm::from_fields(fields) {
        Ok(form) => form,
        Err(e) => return html_response(200, render_page(fields, None, Some(&e.to_string()))),
    };
    match pipeline.run(&form) {
        Ok(plot) => html_response(200, render_page(fields, Some(&plot), None)),
        Err(e) => {
            error!("Request failed: {:#}", e);
            html_response(500, render_page(fields, None, Some(&format!("{:#}", e))))
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode one `application/x-www-form-urlencoded` component.
fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a urlencoded body. Later duplicates are ignored, like a first-value form lookup.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(key))
            .or_insert_with(|| decode_component(value));
    }
    params
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
            c => out.push(c),
        }
    }
    out
}

fn render_page(fields: &HashMap<String, String>, plot: Option<&str>, error: Option<&str>) -> String {
    let value = |name: &str| escape_html(fields.get(name).map(String::as_str).unwrap_or(""));
    let text_input = |name: &str, label: &str, placeholder: &str| {
        format!(
            r#"<label>{label} <input type="text" name="{name}" value="{}" placeholder="{}"></label>"#,
            value(name),
            escape_html(placeholder)
        )
    };

    let selected = fields.get("output_type").map(|s| s.trim().to_ascii_uppercase());
    let options: String = OutputType::ALL
        .iter()
        .filter(|t| t.is_track())
        .map(|t| {
            let sel = if selected.as_deref() == Some(t.name()) { " selected" } else { "" };
            format!(r#"<option value="{0}"{1}>{0}</option>"#, t.name(), sel)
        })
        .collect();

    let error_html = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, escape_html(e)))
        .unwrap_or_default();
    let plot_html = plot
        .map(|p| format!(r#"<img class="plot" alt="Variant effect plot" src="data:image/png;base64,{p}">"#))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Variant effect viewer</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
form label {{ display: block; margin: 0.4em 0; }}
.error {{ color: #b00020; font-weight: bold; }}
.plot {{ max-width: 100%; margin-top: 1em; }}
</style>
</head>
<body>
<h1>Variant effect viewer</h1>
<form method="post" action="/">
{chromosome}
{position}
{reference}
{alternate}
<label>Output type <select name="output_type"><option value="">choose...</option>{options}</select></label>
{window}
{center}
{ontology}
{ref_colour}
{alt_colour}
<button type="submit">Predict</button>
</form>
{error_html}
{plot_html}
</body>
</html>
"#,
        chromosome = text_input("chromosome", "Chromosome", "chr22"),
        position = text_input("position", "Position (1-based)", "36201698"),
        reference = text_input("ref", "Reference bases", "A"),
        alternate = text_input("alt", "Alternate bases", "C"),
        window = text_input("window_size", "Window size", &DEFAULT_WINDOW_SIZE.to_string()),
        center = text_input("prediction_center", "Prediction center (optional)", ""),
        ontology = text_input("ontology_terms", "Ontology terms (comma separated)", DEFAULT_ONTOLOGY_TERM),
        ref_colour = text_input("ref_color", "REF colour", "dimgrey"),
        alt_colour = text_input("alt_color", "ALT colour", "red"),
    )
}

use crate::error::{ServerError, ServerResult};
use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use base64::Engine;
use serde_json::{json, Map, Value};

/// Decodes form bodies during the run phase and publishes the result under
/// `req.data["form"]`.
///
/// `application/x-www-form-urlencoded` becomes a flat string object;
/// `multipart/form-data` text fields become strings and file fields become
/// `{filename, content (base64), content_type}` objects. Other content
/// types pass through untouched. Malformed form payloads are the client's
/// fault and reject with 400.
#[derive(Clone, Default)]
pub struct FormBody;

impl FormBody {
    pub fn new() -> Self {
        FormBody
    }
}

pub(crate) const FORM_KEY: &str = "form";

impl Middleware for FormBody {
    fn run<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let content_type = req.body.content_type().to_string();
            if content_type.starts_with("application/x-www-form-urlencoded") {
                let decoded = parse_urlencoded(req.body.as_bytes())?;
                req.set_data(FORM_KEY, decoded);
            } else if content_type.starts_with("multipart/form-data") {
                let boundary = extract_boundary(&content_type)?;
                let decoded = parse_multipart(&boundary, req.body.as_bytes())?;
                req.set_data(FORM_KEY, decoded);
            }
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(FormBody)
    }
}

fn parse_urlencoded(data: &[u8]) -> ServerResult<Value> {
    let text = std::str::from_utf8(data)
        .map_err(|_| ServerError::BadRequest("form body is not valid UTF-8".to_string()))?;
    let mut fields = Map::new();
    for pair in text.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map_err(|_| ServerError::BadRequest("undecodable form key".to_string()))?;
        let value = urlencoding::decode(value)
            .map_err(|_| ServerError::BadRequest("undecodable form value".to_string()))?;
        fields.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    Ok(Value::Object(fields))
}

fn extract_boundary(content_type: &str) -> ServerResult<String> {
    content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| ServerError::BadRequest("multipart body without boundary".to_string()))
}

fn parse_multipart(boundary: &str, data: &[u8]) -> ServerResult<Value> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut fields = Map::new();

    for part in split_parts(data, &delimiter) {
        let Some((raw_headers, content)) = split_once_bytes(part, b"\r\n\r\n") else {
            return Err(ServerError::BadRequest("malformed multipart part".to_string()));
        };
        let headers = std::str::from_utf8(raw_headers)
            .map_err(|_| ServerError::BadRequest("multipart headers are not UTF-8".to_string()))?;

        let Some(disposition) = headers
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-disposition:"))
        else {
            continue;
        };
        let Some(name) = disposition_param(disposition, "name") else {
            continue;
        };
        let filename = disposition_param(disposition, "filename");
        let part_type = headers
            .lines()
            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-type:").map(str::trim).map(String::from))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let value = match filename {
            Some(filename) => json!({
                "filename": filename,
                "content": base64::engine::general_purpose::STANDARD.encode(content),
                "content_type": part_type,
            }),
            None => match String::from_utf8(content.to_vec()) {
                Ok(text) => Value::String(text),
                Err(_) => continue,
            },
        };
        fields.insert(name, value);
    }

    Ok(Value::Object(fields))
}

/// Splits the raw body into the byte ranges between boundary delimiters,
/// with part-local leading/trailing CRLFs stripped. Stops at the closing
/// `--boundary--` marker.
fn split_parts<'a>(data: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut cursor = data;
    while let Some(start) = find_bytes(cursor, delimiter) {
        cursor = &cursor[start + delimiter.len()..];
        if cursor.starts_with(b"--") {
            break;
        }
        let end = match find_bytes(cursor, delimiter) {
            Some(end) => end,
            None => cursor.len(),
        };
        parts.push(trim_crlf(&cursor[..end]));
        cursor = &cursor[end..];
    }
    parts.retain(|p| !p.is_empty());
    parts
}

fn trim_crlf(mut part: &[u8]) -> &[u8] {
    while part.starts_with(b"\r\n") {
        part = &part[2..];
    }
    while part.ends_with(b"\r\n") {
        part = &part[..part.len() - 2];
    }
    part
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_once_bytes<'a>(data: &'a [u8], sep: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    find_bytes(data, sep).map(|pos| (&data[..pos], &data[pos + sep.len()..]))
}

fn disposition_param(header: &str, param: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|piece| {
        let (key, value) = piece.trim().split_once('=')?;
        if key.eq_ignore_ascii_case(param) {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

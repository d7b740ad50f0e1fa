use anyhow::anyhow;
pub use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod pretty;

pub use reveda::*;

/// Represents fields/content specified on the command line.
///
/// Sort of like HTTPie. Query parameters are '==', body values (JSON) are '='. Only single-level
/// body values are allowed currently, not JSON Pointer assignment.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ArgField {
    Query(String, serde_json::Value),
    Body(String, serde_json::Value),
}

impl FromStr for ArgField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref FIELD_RE: Regex = Regex::new(r"^([a-zA-Z_]+)=(=)?(.*)$").unwrap();
        }
        if let Some(captures) = FIELD_RE.captures(s) {
            let key = captures[1].to_string();
            let val =
                Value::from_str(&captures[3]).unwrap_or(Value::String(captures[3].to_string()));
            let val = match val {
                Value::String(s) if s.is_empty() => Value::Null,
                _ => val,
            };
            if captures.get(2).is_some() {
                Ok(ArgField::Query(key, val))
            } else {
                Ok(ArgField::Body(key, val))
            }
        } else {
            Err(anyhow!("could not parse as a field assignment: {}", s))
        }
    }
}

#[test]
fn test_argfield() {
    use serde_json::json;
    assert_eq!(
        ArgField::from_str("fee=500").unwrap(),
        ArgField::Body("fee".to_string(), json!(500)),
    );
    assert_eq!(
        ArgField::from_str("page==2").unwrap(),
        ArgField::Query("page".to_string(), json!(2)),
    );
    assert_eq!(
        ArgField::from_str("specialization==\"Endocrinologist\"").unwrap(),
        ArgField::Query(
            "specialization".to_string(),
            Value::String("Endocrinologist".to_string())
        )
    );
    assert_eq!(
        ArgField::from_str("specialization==Endocrinologist").unwrap(),
        ArgField::Query(
            "specialization".to_string(),
            Value::String("Endocrinologist".to_string())
        )
    );
    assert_eq!(
        ArgField::from_str("bio=").unwrap(),
        ArgField::Body("bio".to_string(), Value::Null),
    );

    assert!(ArgField::from_str("a").is_err());
    assert!(ArgField::from_str("").is_err());
    assert!(ArgField::from_str("asdf.fee").is_err());

    assert!(ArgField::from_str("bio=\"other value\"").is_ok());
}

pub fn params_from_fields(fields: &[ArgField]) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for f in fields.iter() {
        if let ArgField::Query(ref k, ref v) = f {
            match v {
                Value::String(s) => params.insert(k.to_string(), s.to_string()),
                _ => params.insert(k.to_string(), v.to_string()),
            };
        }
    }
    params
}

/// Consumes the entire Vec of fields passed in. `None` if there were no body fields at all.
pub fn value_from_fields(fields: Vec<ArgField>) -> Option<Value> {
    let mut map = serde_json::Map::new();
    for f in fields.into_iter() {
        if let ArgField::Body(k, v) = f {
            map.insert(k, v);
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

#[test]
fn test_fields_split() {
    use serde_json::json;
    let fields = vec![
        ArgField::from_str("page==2").unwrap(),
        ArgField::from_str("firstName=Asha").unwrap(),
    ];
    let params = params_from_fields(&fields);
    assert_eq!(params.get("page").map(|s| s.as_str()), Some("2"));
    assert_eq!(params.len(), 1);
    assert_eq!(
        value_from_fields(fields),
        Some(json!({"firstName": "Asha"}))
    );
    assert_eq!(value_from_fields(vec![]), None);
}

/// Where the session is kept when `--session-file` isn't given.
pub fn default_session_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("reveda").join("session.json"),
        None => PathBuf::from(".reveda-session.json"),
    }
}

/// MIME type for a profile picture, from its extension.
pub fn guess_image_mime(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or(anyhow!("can't tell image type without a file extension: {}", path.display()))?;
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        "heic" => Ok("image/heic"),
        _ => Err(anyhow!("unsupported image type: .{}", ext)),
    }
}

#[test]
fn test_guess_image_mime() {
    assert_eq!(guess_image_mime(Path::new("me.JPG")).unwrap(), "image/jpeg");
    assert_eq!(guess_image_mime(Path::new("/tmp/a.b/me.png")).unwrap(), "image/png");
    assert!(guess_image_mime(Path::new("me")).is_err());
    assert!(guess_image_mime(Path::new("notes.txt")).is_err());
}

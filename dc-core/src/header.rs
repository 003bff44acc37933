//! Part header parsing: Content-Disposition name token, Content-Length, Content-Type.

use crate::transfer::ContentCategory;

const DISPOSITION: &str = "Content-Disposition:";
const CONTENT_LENGTH: &str = "Content-Length:";
const CONTENT_TYPE: &str = "Content-Type:";

/// Number of comma-separated fields in the disposition name token:
/// `id,from,to,md5,start,end,totalLength`.
pub const NAME_TOKEN_FIELDS: usize = 7;

const FALLBACK_FILE_NAME: &str = "unnamed";

/// Fields carried by a `Content-Disposition` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub id: String,
    pub from: String,
    pub to: String,
    pub checksum: String,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub file_name: String,
}

/// One recognised header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    Disposition(Disposition),
    /// `None` when the value did not parse ("length unknown").
    ContentLength(Option<u64>),
    ContentType {
        category: ContentCategory,
        mime: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("disposition has no name parameter")]
    MissingName,
    #[error("name token has {0} fields, expected {NAME_TOKEN_FIELDS}")]
    TooFewFields(usize),
    #[error("field {field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Parse a single decoded header line. `Ok(None)` for lines that are not part headers.
pub fn parse_header_line(line: &str) -> Result<Option<HeaderField>, HeaderError> {
    if let Some(idx) = line.find(DISPOSITION) {
        let params = &line[idx + DISPOSITION.len()..];
        return parse_disposition(params).map(|d| Some(HeaderField::Disposition(d)));
    }
    if let Some(idx) = line.find(CONTENT_LENGTH) {
        let raw = line[idx + CONTENT_LENGTH.len()..].trim();
        let len = match raw.parse::<u64>() {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(value = raw, error = %e, "unparseable Content-Length, length unknown");
                None
            }
        };
        return Ok(Some(HeaderField::ContentLength(len)));
    }
    if let Some(idx) = line.find(CONTENT_TYPE) {
        let mime = line[idx + CONTENT_TYPE.len()..].trim();
        // The request-level multipart line is not a part header.
        if mime.starts_with("multipart/") {
            return Ok(None);
        }
        return Ok(Some(HeaderField::ContentType {
            category: ContentCategory::from_mime(mime),
            mime: mime.to_string(),
        }));
    }
    Ok(None)
}

fn parse_disposition(params: &str) -> Result<Disposition, HeaderError> {
    let mut name = None;
    let mut file_name = None;
    for param in params.split(';').map(str::trim) {
        if let Some(v) = param.strip_prefix("filename=") {
            file_name = Some(unquote(v));
        } else if let Some(v) = param.strip_prefix("name=") {
            name = Some(unquote(v));
        }
    }
    let name = name.ok_or(HeaderError::MissingName)?;
    let fields: Vec<&str> = name.split(',').map(str::trim).collect();
    if fields.len() < NAME_TOKEN_FIELDS {
        return Err(HeaderError::TooFewFields(fields.len()));
    }
    let start = parse_number("start", fields[4])?;
    let end = parse_number("end", fields[5])?;
    let total_size = match fields[6].parse::<u64>() {
        Ok(n) => n,
        Err(_) => {
            tracing::warn!(value = fields[6], "unparseable totalLength, recording size 0");
            0
        }
    };
    let id = fields[0].to_string();
    let file_name = file_name
        .as_deref()
        .and_then(sanitize_file_name)
        .or_else(|| sanitize_file_name(&id))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    Ok(Disposition {
        id,
        from: fields[1].to_string(),
        to: fields[2].to_string(),
        checksum: fields[3].to_string(),
        start,
        end,
        total_size,
        file_name,
    })
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, HeaderError> {
    value.parse().map_err(|_| HeaderError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn unquote(v: &str) -> String {
    let v = v.trim();
    let v = v.strip_prefix('"').unwrap_or(v);
    let v = v.strip_suffix('"').unwrap_or(v);
    v.to_string()
}

/// Keep only the final path component; reject empty and dot names.
fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => None,
        s => Some(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "Content-Disposition: form-data; name=\"15388916503_4d39,15388916503,15300000000,F240E5CE3A81D5AEA42C018150FD12DE,0,3970565,3970565\"; filename=\"IMG_20231028110641691.jpg\" ";

    #[test]
    fn disposition_full() {
        let field = parse_header_line(LINE).unwrap().unwrap();
        let HeaderField::Disposition(d) = field else {
            panic!("expected disposition");
        };
        assert_eq!(d.id, "15388916503_4d39");
        assert_eq!(d.from, "15388916503");
        assert_eq!(d.to, "15300000000");
        assert_eq!(d.checksum, "F240E5CE3A81D5AEA42C018150FD12DE");
        assert_eq!(d.start, 0);
        assert_eq!(d.end, 3970565);
        assert_eq!(d.total_size, 3970565);
        assert_eq!(d.file_name, "IMG_20231028110641691.jpg");
    }

    #[test]
    fn disposition_too_few_fields() {
        let line = "Content-Disposition: form-data; name=\"a,b,c\"; filename=\"x.bin\"";
        assert_eq!(parse_header_line(line), Err(HeaderError::TooFewFields(3)));
    }

    #[test]
    fn disposition_bad_range_is_malformed() {
        let line = "Content-Disposition: form-data; name=\"id,a,b,md5,zero,10,10\"; filename=\"x.bin\"";
        assert!(matches!(
            parse_header_line(line),
            Err(HeaderError::InvalidNumber { field: "start", .. })
        ));
    }

    #[test]
    fn disposition_missing_total_length_is_zero() {
        let line = "Content-Disposition: form-data; name=\"id,a,b,md5,0,10,\"; filename=\"x.bin\"";
        let Some(HeaderField::Disposition(d)) = parse_header_line(line).unwrap() else {
            panic!("expected disposition");
        };
        assert_eq!(d.total_size, 0);
        assert_eq!(d.end, 10);
    }

    #[test]
    fn disposition_strips_path_components() {
        let line = "Content-Disposition: form-data; name=\"id,a,b,md5,0,1,1\"; filename=\"../../etc/passwd\"";
        let Some(HeaderField::Disposition(d)) = parse_header_line(line).unwrap() else {
            panic!("expected disposition");
        };
        assert_eq!(d.file_name, "passwd");
    }

    #[test]
    fn disposition_without_filename_uses_id() {
        let line = "Content-Disposition: form-data; name=\"abc,a,b,md5,0,1,1\"";
        let Some(HeaderField::Disposition(d)) = parse_header_line(line).unwrap() else {
            panic!("expected disposition");
        };
        assert_eq!(d.file_name, "abc");
    }

    #[test]
    fn content_length() {
        assert_eq!(
            parse_header_line("Content-Length: 3970565 ").unwrap(),
            Some(HeaderField::ContentLength(Some(3970565)))
        );
        assert_eq!(
            parse_header_line("Content-Length: lots").unwrap(),
            Some(HeaderField::ContentLength(None))
        );
    }

    #[test]
    fn content_type() {
        assert_eq!(
            parse_header_line("Content-Type: image/jpeg; charset=utf-8").unwrap(),
            Some(HeaderField::ContentType {
                category: ContentCategory::Image,
                mime: "image/jpeg; charset=utf-8".into()
            })
        );
        assert_eq!(
            parse_header_line("Content-Type: multipart/form-data; boundary=x").unwrap(),
            None
        );
    }

    #[test]
    fn other_lines_ignored() {
        assert_eq!(parse_header_line("Host: www.test.com").unwrap(), None);
        assert_eq!(parse_header_line("").unwrap(), None);
    }
}

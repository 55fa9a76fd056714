use crate::TargetError;
use url::Url;

/// Normalizes a server base URL into the bare `host[:port]` form
///
/// # Normalization Steps
///
/// 1. Trim whitespace; reject if empty
/// 2. Add an `https://` scheme if none is given, then parse
/// 3. Lowercase the host
/// 4. Keep an explicit port, drop scheme, trailing slash, query and fragment
/// 5. Reject anything with a non-root path
///
/// # Examples
///
/// ```
/// use fedi_crawler::target::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://Lemmy.World/").unwrap(), "lemmy.world");
/// assert_eq!(normalize_base_url("127.0.0.1:8536").unwrap(), "127.0.0.1:8536");
/// ```
pub fn normalize_base_url(input: &str) -> Result<String, TargetError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TargetError::Empty);
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).map_err(|_| TargetError::Parse(trimmed.to_string()))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TargetError::Parse(trimmed.to_string()))?
        .to_lowercase();

    if url.path() != "/" && !url.path().is_empty() {
        return Err(TargetError::UnexpectedPath(trimmed.to_string()));
    }

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

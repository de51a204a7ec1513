//! Input sanitisation for capture and watcher requests.
//!
//! Every check runs before any side effect. Whitespace-only values count as
//! absent; everything else is trimmed before it is checked and stored.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::defaults::{
    DEFAULT_ALLOWED_HOSTS, DEFAULT_POLL_INTERVAL_SECS, MAX_COOKIES_PATH_LEN, MAX_DURATION_SECS,
    MAX_OUTPUT_TEMPLATE_LEN, MAX_POLL_INTERVAL_SECS, MAX_PROXY_LEN, MAX_URL_LEN,
    MIN_POLL_INTERVAL_SECS,
};
use crate::error::{ErrorCode, ValidationError};
use crate::types::{
    CaptureOptions, CaptureRequest, CaptureSpec, Target, WatcherRequest, WatcherSpec,
};

static ROOM_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,20}$").expect("valid room id regex"));

static PROXY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(https?|socks5)://[^\s@]+@?[^\s:]+:\d{1,5}$").expect("valid proxy regex")
});

static SAFE_PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._/-]+$").expect("valid path regex"));

const TEMPLATE_FORBIDDEN: &[&str] = &["..", "/", "\\", "|", "&", ";", "`", "$", "(", ")", "<", ">"];

/// Ceilings applied by the validator. Injected from engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_duration_secs: u64,
    pub min_poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
    pub default_poll_interval_secs: u64,
    /// Hosts a target URL may point at. `www.` prefixes are accepted too.
    pub allowed_hosts: Vec<String>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_duration_secs: MAX_DURATION_SECS,
            min_poll_interval_secs: MIN_POLL_INTERVAL_SECS,
            max_poll_interval_secs: MAX_POLL_INTERVAL_SECS,
            default_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn sanitize_room_id(room_id: &str) -> Result<String, ValidationError> {
    let room_id = room_id.trim();
    if !ROOM_ID_PATTERN.is_match(room_id) {
        return Err(ValidationError::new(
            ErrorCode::InvalidRoomId,
            "room_id",
            "Invalid room_id format. Must be numeric string up to 20 digits.",
        ));
    }
    Ok(room_id.to_string())
}

pub fn sanitize_url(url: &str, allowed_hosts: &[String]) -> Result<String, ValidationError> {
    let url = url.trim();
    if url.len() > MAX_URL_LEN {
        return Err(ValidationError::new(
            ErrorCode::InvalidUrl,
            "url",
            format!("URL too long. Maximum {} characters allowed.", MAX_URL_LEN),
        ));
    }

    let parsed = Url::parse(url)
        .map_err(|_| ValidationError::new(ErrorCode::InvalidUrl, "url", "Invalid URL format"))?;

    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let bare_host = host.strip_prefix("www.").unwrap_or(&host);
    let host_ok = allowed_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(bare_host) || allowed.eq_ignore_ascii_case(&host));
    let has_path = parsed.path().len() > 1 || parsed.query().is_some();

    if !scheme_ok || !host_ok || !has_path {
        return Err(ValidationError::new(
            ErrorCode::InvalidUrl,
            "url",
            format!(
                "URL must point at an allowed broadcast host ({})",
                allowed_hosts.join(", ")
            ),
        ));
    }
    Ok(url.to_string())
}

pub fn sanitize_proxy(proxy: &str) -> Result<String, ValidationError> {
    let proxy = proxy.trim();
    if proxy.len() > MAX_PROXY_LEN {
        return Err(ValidationError::new(
            ErrorCode::ProxyError,
            "proxy",
            format!("Proxy URL too long. Maximum {} characters allowed.", MAX_PROXY_LEN),
        ));
    }
    if !PROXY_PATTERN.is_match(proxy) {
        return Err(ValidationError::new(
            ErrorCode::ProxyError,
            "proxy",
            "Invalid proxy format. Must be http://host:port, https://host:port, or socks5://host:port",
        ));
    }
    Ok(proxy.to_string())
}

/// Cookie references are relative `.json` paths inside the cookies directory.
pub fn sanitize_cookies_path(path: &str) -> Result<String, ValidationError> {
    let path = path.trim();
    let reject = |message: &str| {
        Err(ValidationError::new(ErrorCode::CookiesInvalid, "cookies", message))
    };

    if path.contains("..") || path.starts_with('/') {
        return reject("Invalid cookies path. Relative paths with '..' or absolute paths not allowed.");
    }
    if !path.ends_with(".json") {
        return reject("Cookies file must have .json extension");
    }
    if !SAFE_PATH_PATTERN.is_match(path) {
        return reject("Cookies path contains invalid characters");
    }
    if path.len() > MAX_COOKIES_PATH_LEN {
        return reject("Cookies path too long");
    }
    Ok(path.to_string())
}

pub fn validate_duration(duration: u64, max_duration_secs: u64) -> Result<u64, ValidationError> {
    if duration == 0 {
        return Err(ValidationError::invalid("duration", "Duration must be positive"));
    }
    if duration > max_duration_secs {
        return Err(ValidationError::invalid(
            "duration",
            format!(
                "Duration too long. Maximum {} seconds allowed.",
                max_duration_secs
            ),
        ));
    }
    Ok(duration)
}

pub fn validate_poll_interval(interval: u64, limits: &ValidationLimits) -> Result<u64, ValidationError> {
    if interval < limits.min_poll_interval_secs {
        return Err(ValidationError::invalid(
            "poll_interval",
            format!(
                "Poll interval too short. Minimum {} seconds required.",
                limits.min_poll_interval_secs
            ),
        ));
    }
    if interval > limits.max_poll_interval_secs {
        return Err(ValidationError::invalid(
            "poll_interval",
            format!(
                "Poll interval too long. Maximum {} seconds allowed.",
                limits.max_poll_interval_secs
            ),
        ));
    }
    Ok(interval)
}

pub fn sanitize_output_template(template: &str) -> Result<String, ValidationError> {
    let template = template.trim();
    if let Some(bad) = TEMPLATE_FORBIDDEN.iter().find(|bad| template.contains(**bad)) {
        return Err(ValidationError::invalid(
            "output_template",
            format!("Output template contains forbidden sequence: {}", bad),
        ));
    }
    if template.len() > MAX_OUTPUT_TEMPLATE_LEN {
        return Err(ValidationError::invalid(
            "output_template",
            format!(
                "Output template too long. Maximum {} characters allowed.",
                MAX_OUTPUT_TEMPLATE_LEN
            ),
        ));
    }
    Ok(template.to_string())
}

/// Resolve exactly one of room id / URL into a target.
pub fn resolve_target(
    room_id: Option<&str>,
    url: Option<&str>,
    limits: &ValidationLimits,
) -> Result<Target, ValidationError> {
    match (present(room_id), present(url)) {
        (Some(_), Some(_)) => Err(ValidationError::invalid(
            "target",
            "Provide either room_id or url, not both",
        )),
        (None, None) => Err(ValidationError::invalid(
            "target",
            "Either room_id or url is required",
        )),
        (Some(room_id), None) => Ok(Target::RoomId(sanitize_room_id(room_id)?)),
        (None, Some(url)) => Ok(Target::Url(sanitize_url(url, &limits.allowed_hosts)?)),
    }
}

pub fn sanitize_options(options: &CaptureOptions) -> Result<CaptureOptions, ValidationError> {
    Ok(CaptureOptions {
        proxy: present(options.proxy.as_deref()).map(sanitize_proxy).transpose()?,
        cookies: present(options.cookies.as_deref())
            .map(sanitize_cookies_path)
            .transpose()?,
        upload: options.upload,
    })
}

pub fn validate_capture(
    request: &CaptureRequest,
    limits: &ValidationLimits,
) -> Result<CaptureSpec, ValidationError> {
    let target = resolve_target(request.room_id.as_deref(), request.url.as_deref(), limits)?;
    let duration = request
        .duration
        .map(|d| validate_duration(d, limits.max_duration_secs))
        .transpose()?;
    let output_template = present(request.output_template.as_deref())
        .map(sanitize_output_template)
        .transpose()?;
    let options = sanitize_options(&request.options)?;

    Ok(CaptureSpec {
        target,
        duration,
        output_template,
        options,
    })
}

pub fn validate_watcher(
    request: &WatcherRequest,
    limits: &ValidationLimits,
) -> Result<WatcherSpec, ValidationError> {
    let target = resolve_target(request.room_id.as_deref(), request.url.as_deref(), limits)?;
    let poll_interval_secs = validate_poll_interval(
        request
            .poll_interval
            .unwrap_or(limits.default_poll_interval_secs),
        limits,
    )?;
    let options = sanitize_options(&request.options)?;

    Ok(WatcherSpec {
        target,
        poll_interval_secs,
        options,
    })
}

//! Script URL acceptance and import specifier resolution.
//!
//! Only absolute `http`/`https` addresses are fetchable. Everything else is
//! rejected with [`ScriptError::Protocol`] before any network attempt.

use url::Url;

use crate::ScriptError;

/// Schemes a script may be fetched over.
pub const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Parse and validate a script URL.
///
/// # Errors
///
/// Returns [`ScriptError::Protocol`] if `raw` is not an absolute URL or its
/// scheme is not `http`/`https`.
pub fn parse_script_url(raw: &str) -> Result<Url, ScriptError> {
    let url = Url::parse(raw)
        .map_err(|e| ScriptError::protocol(raw, format!("not an absolute URL ({e})")))?;
    check_scheme(raw, &url)?;
    Ok(url)
}

/// Resolve an import specifier relative to the importing script's URL.
///
/// Relative specifiers (`./util.wat`, `../lib/math.wat`) and absolute URLs
/// are both accepted; the result must still use an allowed scheme.
///
/// # Errors
///
/// Returns [`ScriptError::Protocol`] if the specifier cannot be joined onto
/// `base` or resolves to a disallowed scheme.
pub fn resolve_specifier(base: &Url, specifier: &str) -> Result<Url, ScriptError> {
    let url = base.join(specifier).map_err(|e| {
        ScriptError::protocol(
            specifier,
            format!("cannot resolve against '{base}' ({e})"),
        )
    })?;
    check_scheme(specifier, &url)?;
    Ok(url)
}

fn check_scheme(raw: &str, url: &Url) -> Result<(), ScriptError> {
    if ALLOWED_SCHEMES.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(ScriptError::protocol(
            raw,
            format!("scheme '{}' is not allowed", url.scheme()),
        ))
    }
}

//! Remote path construction
//!
//! A remote spec is `<name>[:<base>]` as understood by rclone. Targets are
//! built by joining a cleaned base with a cleaned sub-path, always with `/`.

/// Replace `\` with `/` and collapse repeated separators
fn normalize_separators(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut out = String::with_capacity(replaced.len());
    let mut prev_slash = false;
    for c in replaced.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// Split a remote spec into `(name, base)` at the first colon
pub fn split_remote(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((name, base)) => (name, base),
        None => (spec, ""),
    }
}

/// Remote name of a spec, without the base path
pub fn remote_name(spec: &str) -> &str {
    split_remote(spec).0
}

/// Cleaned base path of a spec; keeps a leading `/` only for absolute bases
fn clean_base(base: &str) -> String {
    let base = base.trim_start_matches(':');
    let absolute = base.starts_with('/');
    let trimmed = normalize_separators(base).trim_matches('/').to_string();
    if absolute {
        format!("/{}", trimmed)
    } else {
        trimmed
    }
}

/// Build `<name>:<base>[/<sub>]` from a remote spec and a relative sub-path
pub fn build_remote_path(spec: &str, sub: &str) -> String {
    let (name, base) = split_remote(spec);
    let base = clean_base(base);
    let sub = normalize_separators(sub).trim_matches('/').to_string();

    let path = if sub.is_empty() {
        base
    } else if base.is_empty() || base.ends_with('/') {
        format!("{}{}", base, sub)
    } else {
        format!("{}/{}", base, sub)
    };

    format!("{}:{}", name, path)
}

/// The remote root as rclone addresses it: `<name>:`
pub fn remote_root(spec: &str) -> String {
    format!("{}:", remote_name(spec))
}

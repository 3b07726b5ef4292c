//! Pure derivation of the per-repository namespace that partitions all
//! persisted state in the Store.
//!
//! Kept free of I/O so it can be unit-tested against representative remote
//! URL shapes without a real git checkout.

use std::path::Path;

/// Slug-normalise a string: lowercase, collapse any run of characters
/// outside `[a-z0-9._-]` to a single `-`, then trim leading/trailing `-`.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_sep = false;
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// A parsed `(host, owner, repo)` triple, slug-normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTriple {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RemoteTriple {
    pub fn namespace(&self) -> String {
        format!("{}-{}-{}", self.host, self.owner, self.repo)
    }
}

/// Parse a git remote URL into `(host, owner, repo)`.
///
/// Handles the three shapes named in the design notes:
/// - `https://h.x/a/b.git`
/// - `git@h.x:a/b.git`
/// - `ssh://git@h.x:22/a/b`
pub fn parse_remote_url(url: &str) -> Option<RemoteTriple> {
    let url = url.trim();

    let rest = if let Some(stripped) = url.strip_prefix("ssh://") {
        strip_userinfo(stripped)
    } else if let Some(stripped) = url.strip_prefix("https://") {
        strip_userinfo(stripped)
    } else if let Some(stripped) = url.strip_prefix("http://") {
        strip_userinfo(stripped)
    } else if let Some(at_pos) = url.find('@') {
        // scp-like shorthand: git@host:owner/repo(.git)
        if let Some(colon_pos) = url[at_pos..].find(':') {
            let host = &url[at_pos + 1..at_pos + colon_pos];
            let path = &url[at_pos + colon_pos + 1..];
            return build_triple(host, path);
        }
        return None;
    } else {
        url
    };

    // rest is now "host[:port]/owner/repo(.git)" for the URL-shaped cases.
    let slash_pos = rest.find('/')?;
    let host_port = &rest[..slash_pos];
    let host = host_port.split(':').next().unwrap_or(host_port);
    let path = &rest[slash_pos + 1..];
    build_triple(host, path)
}

fn strip_userinfo(s: &str) -> &str {
    match s.find('@') {
        Some(pos) => &s[pos + 1..],
        None => s,
    }
}

fn build_triple(host: &str, path: &str) -> Option<RemoteTriple> {
    let path = path.trim_start_matches('/').trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.rsplitn(2, '/');
    let repo = parts.next()?;
    let owner = parts.next()?;
    if host.is_empty() || owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(RemoteTriple {
        host: slugify(host),
        owner: slugify(owner),
        repo: slugify(repo),
    })
}

/// Fallback namespace when no remote origin exists: the directory name
/// slug plus a 12-hex-digit content hash of its absolute path, so two
/// distinct local-only clones never collide.
pub fn fallback_namespace(repo_root: &Path) -> String {
    let dir_name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());
    let abs = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = fnv1a_hex12(abs.to_string_lossy().as_bytes());
    format!("{}-{}", slugify(&dir_name), digest)
}

/// Derive the namespace for a repository: prefer the remote-derived triple,
/// fall back to the directory-hash scheme when there is no parseable origin.
pub fn derive_namespace(remote_url: Option<&str>, repo_root: &Path) -> String {
    remote_url
        .and_then(parse_remote_url)
        .map(|triple| triple.namespace())
        .unwrap_or_else(|| fallback_namespace(repo_root))
}

/// FNV-1a, rendered as 12 lowercase hex digits (48 bits). Not cryptographic;
/// this only needs to avoid accidental collisions between local clones.
fn fnv1a_hex12(bytes: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:012x}", hash & 0xffff_ffff_ffff)
}

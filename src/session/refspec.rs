//! Refspecs: `[+]<src>:<dst>` patterns mapping remote ref names onto local
//! ones, with a single `*` wildcard segment on each side.

use std::str::FromStr;

use crate::errors::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    /// `+` prefix: skip fast-forward validation.
    pub force: bool,
    /// Source pattern; empty means deletion (`:<dst>`).
    pub src: String,
    /// Destination pattern.
    pub dst: String,
}

impl FromStr for Refspec {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (force, rest) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (src, dst) = rest
            .split_once(':')
            .ok_or_else(|| GitError::Invalid(format!("refspec `{s}` is missing `:`")))?;

        let src_wild = src.matches('*').count();
        let dst_wild = dst.matches('*').count();
        if src_wild > 1 || dst_wild > 1 || (src_wild != dst_wild && !src.is_empty()) {
            return Err(GitError::Invalid(format!(
                "refspec `{s}` has mismatched wildcards"
            )));
        }
        if dst.is_empty() {
            return Err(GitError::Invalid(format!(
                "refspec `{s}` has an empty destination"
            )));
        }

        Ok(Refspec {
            force,
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }
}

impl Refspec {
    /// Map a concrete source ref name to its destination name, if this spec
    /// matches it.
    pub fn map(&self, name: &str) -> Option<String> {
        if self.src.is_empty() {
            return None;
        }
        match self.src.split_once('*') {
            None => (self.src == name).then(|| self.dst.clone()),
            Some((prefix, suffix)) => {
                let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
                Some(self.dst.replacen('*', middle, 1))
            }
        }
    }
}

impl std::fmt::Display for Refspec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.force {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exact and wildcard parsing and mapping.
    #[test]
    fn parse_and_map() {
        let exact: Refspec = "refs/heads/main:refs/remotes/origin/main".parse().unwrap();
        assert!(!exact.force);
        assert_eq!(
            exact.map("refs/heads/main"),
            Some("refs/remotes/origin/main".to_string())
        );
        assert_eq!(exact.map("refs/heads/dev"), None);

        let wild: Refspec = "+refs/heads/*:refs/remotes/origin/*".parse().unwrap();
        assert!(wild.force);
        assert_eq!(
            wild.map("refs/heads/feature/x"),
            Some("refs/remotes/origin/feature/x".to_string())
        );
        assert_eq!(wild.map("refs/tags/v1"), None);
    }

    /// Deletion refspecs have an empty source and never map.
    #[test]
    fn deletion_refspec() {
        let delete: Refspec = ":refs/heads/gone".parse().unwrap();
        assert!(delete.src.is_empty());
        assert_eq!(delete.map("refs/heads/gone"), None);
    }

    /// Malformed refspecs are rejected.
    #[test]
    fn rejects_malformed() {
        assert!("no-colon".parse::<Refspec>().is_err());
        assert!("refs/heads/*:refs/remotes/no-star".parse::<Refspec>().is_err());
        assert!("a:".parse::<Refspec>().is_err());
        assert!("refs/*/x*:refs/*/y*".parse::<Refspec>().is_err());
    }

    /// Display round-trips.
    #[test]
    fn display_round_trip() {
        for text in ["+refs/heads/*:refs/heads/*", "refs/heads/a:refs/heads/b"] {
            let spec: Refspec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

const DOCKER_HUB_HOSTS: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// A syntactically valid container image reference:
/// `[registry[:port]/]repository[:tag][@algo:hex]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_registry(raw: &str, host: &str) -> Result<(), String> {
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let port_ok = port.is_none_or(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if name_ok && port_ok {
        Ok(())
    } else {
        Err(format!("invalid registry host `{host}` in `{raw}`"))
    }
}

fn validate_path_component(raw: &str, component: &str) -> Result<(), String> {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let valid = component.chars().next().is_some_and(alnum)
        && component.chars().last().is_some_and(alnum)
        && component
            .chars()
            .all(|c| alnum(c) || c == '.' || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid repository component `{component}` in `{raw}`"))
    }
}

fn validate_tag(raw: &str, tag: &str) -> Result<(), String> {
    let valid = (1..=128).contains(&tag.len())
        && tag
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid tag `{tag}` in `{raw}`"))
    }
}

fn validate_digest(raw: &str, digest: &str) -> Result<(), String> {
    let Some((algo, hex)) = digest.split_once(':') else {
        return Err(format!("invalid digest `{digest}` in `{raw}`"));
    };
    let algo_ok = !algo.is_empty()
        && algo
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
    let hex_ok = hex.len() >= 32 && hex.chars().all(|c| c.is_ascii_hexdigit());
    if algo_ok && hex_ok {
        Ok(())
    } else {
        Err(format!("invalid digest `{digest}` in `{raw}`"))
    }
}

impl ImageRef {
    pub fn parse(value: &str) -> Result<Self, String> {
        let raw = value.trim();
        if raw.is_empty() {
            return Err("image reference cannot be empty".to_string());
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(format!("image reference `{raw}` contains whitespace"));
        }
        let (name_and_tag, digest) = match raw.split_once('@') {
            Some((head, digest)) => {
                validate_digest(raw, digest)?;
                (head, Some(digest.to_string()))
            }
            None => (raw, None),
        };
        let last_slash = name_and_tag.rfind('/');
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
                (&name_and_tag[..colon], Some(&name_and_tag[colon + 1..]))
            }
            _ => (name_and_tag, None),
        };
        if let Some(tag) = tag {
            validate_tag(raw, tag)?;
        }
        let mut components = name.split('/').collect::<Vec<_>>();
        let registry = if components.len() > 1 && looks_like_registry(components[0]) {
            let host = components.remove(0);
            validate_registry(raw, host)?;
            Some(host.to_string())
        } else {
            None
        };
        for component in &components {
            validate_path_component(raw, component)?;
        }
        Ok(Self {
            registry,
            repository: components.join("/"),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Registry and repository without tag or digest. Docker Hub spellings
    /// (`docker.io/library/x`, `x`) collapse to the same key.
    pub fn repository_key(&self) -> String {
        match self.registry.as_deref() {
            None => self.repository.clone(),
            Some(host) if DOCKER_HUB_HOSTS.contains(&host) => self
                .repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
                .to_string(),
            Some(host) => format!("{host}/{}", self.repository),
        }
    }

    /// Last path segment of the repository, e.g. `svc-a` for `acme/svc-a:1.0`.
    pub fn basename(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    pub fn is_pinned<S: AsRef<str>>(&self, floating_tags: &[S]) -> bool {
        if self.digest.is_some() {
            return true;
        }
        match self.tag.as_deref() {
            None => false,
            Some(tag) => !floating_tags
                .iter()
                .any(|floating| floating.as_ref().eq_ignore_ascii_case(tag)),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for ImageRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}

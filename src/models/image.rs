use std::fmt;

/// A container image reference of the form `repository[:tag][@digest]`.
///
/// The tag is whatever follows the first `:` after the last `/`, so registry
/// ports (`localhost:5000/app`) stay part of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse an image string. Parsing never fails; missing parts are `None`.
    ///
    /// Examples:
    ///   "nginx:1.25.0" -> ("nginx", Some("1.25.0"))
    ///   "localhost:5000/app" -> ("localhost:5000/app", None)
    ///   "registry/api:v1@sha256:abc" -> ("registry/api", Some("v1")), digest "sha256:abc"
    pub fn parse(image: &str) -> Self {
        let image = image.trim();

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (image, None),
        };

        let name_start = name.rfind('/').map_or(0, |pos| pos + 1);
        let (repository, tag) = match name[name_start..].find(':') {
            Some(offset) => {
                let pos = name_start + offset;
                let tag = &name[pos + 1..];
                (
                    &name[..pos],
                    (!tag.is_empty()).then(|| tag.to_string()),
                )
            },
            None => (name, None),
        };

        Self {
            repository: repository.to_string(),
            tag,
            digest,
        }
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
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

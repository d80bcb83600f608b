use std::fmt;
use std::str::FromStr;

/// An XMPP address: `local@domain/resource`, per RFC 6120 section 1.4.
///
/// Any of the three parts may be empty. Parsing never fails: an
/// unparseable string simply yields whatever components can be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub local: String,
    pub domain: String,
    pub resource: String,
}

impl Jid {
    pub fn new(local: impl Into<String>, domain: impl Into<String>, resource: impl Into<String>) -> Self {
        Jid {
            local: local.into(),
            domain: domain.into(),
            resource: resource.into(),
        }
    }

    pub fn domain_only(domain: impl Into<String>) -> Self {
        Jid {
            local: String::new(),
            domain: domain.into(),
            resource: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.domain.is_empty() && self.resource.is_empty()
    }

    pub fn is_bare(&self) -> bool {
        !self.domain.is_empty() && self.resource.is_empty()
    }

    pub fn is_full(&self) -> bool {
        !self.domain.is_empty() && !self.resource.is_empty()
    }

    /// `local@domain`, or just `domain` if local is empty.
    pub fn bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: String::new(),
        }
    }

    pub fn to_bare_string(&self) -> String {
        if self.local.is_empty() {
            self.domain.clone()
        } else {
            format!("{}@{}", self.local, self.domain)
        }
    }

    pub fn to_full_string(&self) -> String {
        if self.resource.is_empty() {
            self.to_bare_string()
        } else {
            format!("{}/{}", self.to_bare_string(), self.resource)
        }
    }

    /// Returns a new JID with `resource` bound onto this JID's local/domain.
    pub fn with_resource(&self, resource: impl Into<String>) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: resource.into(),
        }
    }
}

impl FromStr for Jid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Jid::default());
        }

        let (bare, resource) = match s.find('/') {
            Some(idx) => (&s[..idx], s[idx + 1..].to_string()),
            None => (s, String::new()),
        };

        let (local, domain) = match bare.find('@') {
            Some(idx) => (bare[..idx].to_string(), bare[idx + 1..].to_string()),
            None => (String::new(), bare.to_string()),
        };
        let domain = domain.strip_suffix('.').map(str::to_string).unwrap_or(domain);

        Ok(Jid { local, domain, resource })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_full_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_jid() {
        let jid: Jid = "alice@example.org/home".parse().unwrap();
        assert_eq!(jid.local, "alice");
        assert_eq!(jid.domain, "example.org");
        assert_eq!(jid.resource, "home");
    }

    #[test]
    fn parses_bare_jid() {
        let jid: Jid = "alice@example.org".parse().unwrap();
        assert_eq!(jid.resource, "");
        assert!(jid.is_bare());
    }

    #[test]
    fn parses_domain_only() {
        let jid: Jid = "example.org".parse().unwrap();
        assert_eq!(jid.local, "");
        assert_eq!(jid.domain, "example.org");
    }

    #[test]
    fn parses_domain_with_resource() {
        let jid: Jid = "example.org/console".parse().unwrap();
        assert_eq!(jid.local, "");
        assert_eq!(jid.domain, "example.org");
        assert_eq!(jid.resource, "console");
    }

    #[test]
    fn trims_trailing_dot_from_domain() {
        let jid: Jid = "alice@example.org./home".parse().unwrap();
        assert_eq!(jid.domain, "example.org");
    }

    #[test]
    fn round_trips_through_display() {
        for raw in ["alice@example.org/home", "alice@example.org", "example.org"] {
            let jid: Jid = raw.parse().unwrap();
            assert_eq!(jid.to_full_string(), raw);
        }
    }

    #[test]
    fn bare_strips_resource() {
        let jid: Jid = "alice@example.org/home".parse().unwrap();
        assert_eq!(jid.bare().to_full_string(), "alice@example.org");
    }

    #[test]
    fn with_resource_binds_a_resource() {
        let jid: Jid = "alice@example.org".parse().unwrap();
        let bound = jid.with_resource("phone");
        assert_eq!(bound.to_full_string(), "alice@example.org/phone");
    }
}

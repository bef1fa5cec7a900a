use std::fmt;

/// Index value for a resource that has no `count`.
pub const NO_INDEX: i64 = -1;

/// A fully qualified resource instance address like "module.net.null_resource.web[1]".
///
/// Immutable once built; the derived state id is the key into the state and diff stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    path: Vec<String>,
    resource_type: String,
    name: String,
    index: i64,
}

impl ResourceAddress {
    pub fn new(resource_type: &str, name: &str) -> Self {
        Self {
            path: vec![],
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            index: NO_INDEX,
        }
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = if index < 0 { NO_INDEX } else { index };
        self
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    /// Store key: `type.name`, plus `.index` for counted instances.
    pub fn state_id(&self) -> String {
        if self.index > NO_INDEX {
            format!("{}.{}.{}", self.resource_type, self.name, self.index)
        } else {
            format!("{}.{}", self.resource_type, self.name)
        }
    }

    /// Rebuild an address from a store key ("type.name" or "type.name.index").
    pub fn from_state_id(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split('.').collect();
        let (resource_type, name, index) = match parts.as_slice() {
            [t, n] => (*t, *n, NO_INDEX),
            [t, n, i] => (*t, *n, i.parse::<i64>().ok().filter(|i| *i >= 0)?),
            _ => return None,
        };
        if resource_type.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(resource_type, name).with_index(index))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.path {
            write!(f, "module.{}.", m)?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if self.index > NO_INDEX {
            write!(f, "[{}]", self.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_with_index() {
        let addr = ResourceAddress::new("widget", "x").with_index(2);
        assert_eq!(addr.state_id(), "widget.x.2");
    }

    #[test]
    fn state_id_without_index() {
        let addr = ResourceAddress::new("widget", "x").with_index(-1);
        assert_eq!(addr.state_id(), "widget.x");
        assert_eq!(addr.index(), NO_INDEX);
    }

    #[test]
    fn display_uses_brackets_for_index() {
        let addr = ResourceAddress::new("null_resource", "web").with_index(1);
        assert_eq!(addr.to_string(), "null_resource.web[1]");
        assert!(addr.path().is_empty());
        assert_eq!(ResourceAddress::new("null_resource", "web").to_string(), "null_resource.web");
    }

    #[test]
    fn state_id_round_trips() {
        for id in ["widget.x", "widget.x.4"] {
            assert_eq!(ResourceAddress::from_state_id(id).unwrap().state_id(), id);
        }
        assert!(ResourceAddress::from_state_id("widget").is_none());
        assert!(ResourceAddress::from_state_id("widget.x.y").is_none());
    }
}

//! Authorized bus names

use std::fmt;

/// The set of buses clients may open, fixed for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusRegistry {
    buses: Vec<String>,
}

impl BusRegistry {
    /// Build from names, dropping blanks and duplicates (first one wins)
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buses: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !buses.iter().any(|b| b == name) {
                buses.push(name.to_string());
            }
        }
        Self { buses }
    }

    /// Parse a comma separated list such as `can0,vcan0`
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn contains(&self, bus: &str) -> bool {
        self.buses.iter().any(|b| b == bus)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.buses.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

impl fmt::Display for BusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buses.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let registry = BusRegistry::parse_list("can0, vcan0,,can0");
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("can0"));
        assert!(registry.contains("vcan0"));
        assert!(!registry.contains("can1"));
        assert!(!registry.contains(""));
        assert_eq!(registry.to_string(), "can0,vcan0");
    }

    #[test]
    fn test_empty_registry_authorizes_nothing() {
        let registry = BusRegistry::parse_list("");
        assert!(registry.is_empty());
        assert!(!registry.contains("can0"));
    }

    #[test]
    fn test_exact_match_only() {
        let registry = BusRegistry::new(["can0"]);
        assert!(!registry.contains("can"));
        assert!(!registry.contains("can00"));
        assert!(!registry.contains("CAN0"));
    }
}

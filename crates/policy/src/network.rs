use serde::{Deserialize, Serialize};

/// Network access is hard-coded deny-all. The type itself — not a runtime
/// check — makes `allow_network = true` unrepresentable: the only public
/// constructor is [`AllowNetwork::forced_false`], and `Deserialize` silently
/// coerces any incoming `true` to `false` rather than erroring, matching
/// spec's "any attempt to set true in any layer is silently coerced".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllowNetwork(());

impl AllowNetwork {
    pub fn forced_false() -> Self {
        AllowNetwork(())
    }

    pub fn as_bool(self) -> bool {
        false
    }
}

impl Serialize for AllowNetwork {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bool(false)
    }
}

impl<'de> Deserialize<'de> for AllowNetwork {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Accept whatever boolean the layer carries, coerce to false.
        let _ = bool::deserialize(deserializer).unwrap_or(false);
        Ok(AllowNetwork(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_true_as_false() {
        let v: AllowNetwork = serde_json::from_str("true").unwrap();
        assert!(!v.as_bool());
    }

    #[test]
    fn serializes_as_false() {
        let v = AllowNetwork::forced_false();
        assert_eq!(serde_json::to_string(&v).unwrap(), "false");
    }
}

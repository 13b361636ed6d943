use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::error::{CairnError, Result};

/// Identifier of a stored object.
///
/// A direct object is a single content-addressed block and its ID is the
/// block's content ID. Larger objects are stored as an indirect index block
/// listing the spans that make up the stream; their IDs carry an `I` marker
/// in front of the index block's content ID.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObjectId {
    Direct(ContentId),
    Indirect(ContentId),
}

impl ObjectId {
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('I') {
            let id = ContentId::new(rest).map_err(|_| CairnError::InvalidObjectId(s.into()))?;
            Ok(ObjectId::Indirect(id))
        } else {
            let id = ContentId::new(s).map_err(|_| CairnError::InvalidObjectId(s.into()))?;
            Ok(ObjectId::Direct(id))
        }
    }

    /// The content ID of the underlying block (the payload block for direct
    /// objects, the index block for indirect ones).
    pub fn content_id(&self) -> &ContentId {
        match self {
            ObjectId::Direct(id) | ObjectId::Indirect(id) => id,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, ObjectId::Indirect(_))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Direct(id) => write!(f, "{id}"),
            ObjectId::Indirect(id) => write!(f, "I{id}"),
        }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl FromStr for ObjectId {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = CairnError;

    fn try_from(s: String) -> Result<Self> {
        ObjectId::parse(&s)
    }
}

impl From<ObjectId> for String {
    fn from(oid: ObjectId) -> String {
        oid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_displays_as_bare_content_id() {
        let oid = ObjectId::parse("deadbeef").unwrap();
        assert!(!oid.is_indirect());
        assert_eq!(oid.to_string(), "deadbeef");
    }

    #[test]
    fn indirect_carries_marker() {
        let oid = ObjectId::parse("Ideadbeef").unwrap();
        assert!(oid.is_indirect());
        assert_eq!(oid.content_id().as_str(), "deadbeef");
        assert_eq!(oid.to_string(), "Ideadbeef");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ObjectId::parse("").is_err());
        assert!(ObjectId::parse("I").is_err());
        assert!(ObjectId::parse("not hex!").is_err());
    }

    #[test]
    fn parse_display_roundtrip() {
        for s in ["deadbeef", "Ideadbeef", "mdeadbeef01"] {
            let oid = ObjectId::parse(s).unwrap();
            assert_eq!(oid.to_string(), s);
            assert_eq!(ObjectId::parse(&oid.to_string()).unwrap(), oid);
        }
    }
}

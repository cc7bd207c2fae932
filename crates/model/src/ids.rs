use {
    alloy_primitives::B256,
    serde::{Deserialize, Serialize},
};

macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub B256);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0.0
            }
        }

        impl From<B256> for $name {
            fn from(digest: B256) -> Self {
                Self(digest)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }
    };
}

hash_id! {
    /// Identifier of a bid, a digest of submitter, submission time, size
    /// class and the submitter's bid sequence number.
    BidId
}

hash_id! {
    /// Identifier of a candidate or consumed cluster, a content hash of
    /// its member bids, average score and formation time.
    ClusterId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed_hex() {
        let id = BidId(B256::repeat_byte(0xab));
        assert!(id.to_string().starts_with("0xabab"));
        assert_eq!(format!("{id:?}"), format!("BidId({id})"));
    }

    #[test]
    fn ids_serialize_as_transparent_hex_strings() {
        let id = ClusterId(B256::repeat_byte(0x11));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(32)));
        let back: ClusterId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

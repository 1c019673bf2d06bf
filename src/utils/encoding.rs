/// Decode a `0x`-prefixed (or bare) hex string into a fixed-size array.
pub fn decode_fixed<const N: usize>(value: &str) -> Result<[u8; N], ::hex::FromHexError> {
	let stripped = value.strip_prefix("0x").unwrap_or(value);
	let bytes = ::hex::decode(stripped)?;
	bytes
		.try_into()
		.map_err(|_| ::hex::FromHexError::InvalidStringLength)
}

/// Short form of a hash for log lines, e.g. `0x1a2b3c4d`.
pub fn short_hash(bytes: &[u8]) -> String {
	let len = bytes.len().min(4);
	format!("0x{}", ::hex::encode(&bytes[..len]))
}

/// Serde adapter for fixed-size byte arrays as `0x` hex strings.
pub mod serde_fixed {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&format!("0x{}", ::hex::encode(bytes)))
	}

	pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		super::decode_fixed::<N>(&value).map_err(serde::de::Error::custom)
	}
}

/// Serde adapter for variable-length byte strings as `0x` hex strings.
pub mod serde_bytes {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&format!("0x{}", ::hex::encode(bytes)))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		let stripped = value.strip_prefix("0x").unwrap_or(&value);
		::hex::decode(stripped).map_err(serde::de::Error::custom)
	}
}

/// Serde adapter for a list of 32-byte hashes.
pub mod serde_hash_list {
	use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};

	pub fn serialize<S>(hashes: &[[u8; 32]], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(hashes.len()))?;
		for hash in hashes {
			seq.serialize_element(&format!("0x{}", ::hex::encode(hash)))?;
		}
		seq.end()
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<[u8; 32]>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = Vec::<String>::deserialize(deserializer)?;
		values
			.iter()
			.map(|v| super::decode_fixed::<32>(v).map_err(serde::de::Error::custom))
			.collect()
	}
}

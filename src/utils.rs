//! Utility functions for rendering and parsing party ids

use super::party::PartyId;
use bech32::{Bech32m, Hrp};

pub const PARTY_HRP: &str = "party";

// encode a party id as a bech32m string with the `party` prefix
pub fn party_id_to_bech32(id: &PartyId) -> anyhow::Result<String> {
    let hrp = Hrp::parse(PARTY_HRP)?;
    let encode = bech32::encode::<Bech32m>(hrp, id.as_bytes())?;
    Ok(encode)
}

pub fn party_id_from_bech32(encoded: &str) -> anyhow::Result<PartyId> {
    let (hrp, data) = bech32::decode(encoded)?;
    if hrp != Hrp::parse(PARTY_HRP)? {
        anyhow::bail!("expected a {PARTY_HRP} id, got prefix {hrp}");
    }
    let bytes: [u8; 16] = data
        .try_into()
        .map_err(|data: Vec<u8>| anyhow::anyhow!("party id must be 16 bytes, got {}", data.len()))?;

    Ok(PartyId::from_bytes(bytes))
}

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, U256};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    function symbol() external view returns (string);
    function decimals() external view returns (uint8);
}

/// ERC-20 `Transfer` with the amount kept at full precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// `from`/`to` come straight from topics 1 and 2, `value` from the first
/// data word. ERC-721 transfers (value indexed, empty data) are rejected.
pub fn decode_transfer_event(log: &Log) -> anyhow::Result<TransferEvent> {
    let topics = log.topics();
    if topics.len() != 3 || topics[0] != Transfer::SIGNATURE_HASH {
        anyhow::bail!("Not an ERC-20 Transfer log ({} topics)", topics.len());
    }

    let data = &log.data().data;
    if data.len() < 32 {
        anyhow::bail!("Transfer log data too short: {} bytes", data.len());
    }

    Ok(TransferEvent {
        from: Address::from_word(topics[1]),
        to: Address::from_word(topics[2]),
        value: U256::from_be_slice(&data[..32]),
    })
}

/// `symbol()` returns `string` on most tokens and `bytes32` on some older ones.
pub fn decode_symbol(output: &[u8]) -> Option<String> {
    if let Ok(DynSolValue::String(symbol)) = DynSolType::String.abi_decode(output) {
        return Some(symbol);
    }
    if output.len() == 32 {
        let trimmed: Vec<u8> = output.iter().copied().take_while(|b| *b != 0).collect();
        if !trimmed.is_empty() {
            return String::from_utf8(trimmed).ok();
        }
    }
    None
}

pub fn decode_decimals(output: &[u8]) -> Option<u8> {
    if output.len() < 32 {
        return None;
    }
    let word = &output[..32];
    word[..31].iter().all(|b| *b == 0).then_some(word[31])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::testing::log_at;
    use alloy::sol_types::SolValue;
    use alloy_primitives::{B256, Bytes, FixedBytes, address};

    const TOKEN: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    const FROM: Address = address!("1111111111111111111111111111111111111111");
    const TO: Address = address!("2222222222222222222222222222222222222222");

    #[test]
    fn decodes_erc20_transfer() {
        let log = log_at(
            TOKEN,
            vec![Transfer::SIGNATURE_HASH, FROM.into_word(), TO.into_word()],
            Bytes::from(U256::from(42u64).to_be_bytes::<32>().to_vec()),
            1,
            0,
        );

        let transfer = decode_transfer_event(&log).unwrap();
        assert_eq!(transfer.from, FROM);
        assert_eq!(transfer.to, TO);
        assert_eq!(transfer.value, U256::from(42u64));
    }

    #[test]
    fn rejects_erc721_shaped_logs() {
        let log = log_at(
            TOKEN,
            vec![
                Transfer::SIGNATURE_HASH,
                FROM.into_word(),
                TO.into_word(),
                B256::from(U256::from(7u64).to_be_bytes::<32>()),
            ],
            Bytes::new(),
            1,
            0,
        );
        assert!(decode_transfer_event(&log).is_err());
    }

    #[test]
    fn decodes_string_and_bytes32_symbols() {
        let encoded = "USDC".to_string().abi_encode();
        assert_eq!(decode_symbol(&encoded).as_deref(), Some("USDC"));

        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_symbol(FixedBytes::<32>::from(word).as_slice()).as_deref(), Some("MKR"));

        assert_eq!(decode_symbol(&[]), None);
    }

    #[test]
    fn decodes_decimals() {
        assert_eq!(decode_decimals(&U256::from(6u64).to_be_bytes::<32>()), Some(6));
        assert_eq!(decode_decimals(&U256::from(300u64).to_be_bytes::<32>()), None);
        assert_eq!(decode_decimals(&[1, 2]), None);
    }
}

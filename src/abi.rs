//! Contract ABI parsing and event log decoding.

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::json_abi::{EventParam, Function, JsonAbi, Param};
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, I256, U256, hex, keccak256};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("Invalid ABI JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),
}

/// Event with its resolved parameter types and topic0.
#[derive(Debug, Clone)]
pub struct EventAbi {
    pub name: String,
    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub signature: String,
    pub selector: B256,
    inputs: Vec<EventParam>,
    types: Vec<DynSolType>,
}

#[derive(Debug, Clone)]
pub struct ParsedAbi {
    pub functions: Vec<Function>,
    pub events: Vec<EventAbi>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event_name: String,
    pub params: Map<String, Value>,
}

pub fn parse_abi(json: &str) -> Result<ParsedAbi, AbiError> {
    let abi: JsonAbi = serde_json::from_str(json)?;

    let events = abi
        .events()
        .filter(|event| !event.anonymous)
        .map(|event| {
            let types = event
                .inputs
                .iter()
                .map(|input| param_type(&input.ty, &input.components))
                .collect::<Result<Vec<_>, _>>()?;
            let signature = format!(
                "{}({})",
                event.name,
                types
                    .iter()
                    .map(|ty| ty.sol_type_name().into_owned())
                    .collect::<Vec<_>>()
                    .join(",")
            );

            Ok(EventAbi {
                name: event.name.clone(),
                selector: keccak256(signature.as_bytes()),
                signature,
                inputs: event.inputs.clone(),
                types,
            })
        })
        .collect::<Result<Vec<_>, AbiError>>()?;

    Ok(ParsedAbi {
        functions: abi.functions().cloned().collect(),
        events,
    })
}

/// Decodes a single log against `abi_json`. `Ok(None)` means no event matched.
pub fn decode_log(log: &Log, abi_json: &str) -> Result<Option<DecodedEvent>, AbiError> {
    Ok(AbiDecoder::new(abi_json)?.decode_log(log))
}

/// Parsed once per job and shared across decode workers.
#[derive(Debug, Clone)]
pub struct AbiDecoder {
    events: Vec<EventAbi>,
}

impl AbiDecoder {
    pub fn new(abi_json: &str) -> Result<Self, AbiError> {
        Ok(Self {
            events: parse_abi(abi_json)?.events,
        })
    }

    pub fn events(&self) -> &[EventAbi] {
        &self.events
    }

    /// First event whose topic0 matches and whose layout decodes wins.
    pub fn decode_log(&self, log: &Log) -> Option<DecodedEvent> {
        let topics = log.topics();
        let topic0 = topics.first()?;

        self.events
            .iter()
            .filter(|event| event.selector == *topic0)
            .find_map(|event| event.decode(&topics[1..], &log.data().data))
    }
}

impl EventAbi {
    fn decode(&self, topics: &[B256], data: &[u8]) -> Option<DecodedEvent> {
        let indexed = self.inputs.iter().filter(|input| input.indexed).count();
        if topics.len() != indexed {
            return None;
        }

        let body_types: Vec<DynSolType> = self
            .inputs
            .iter()
            .zip(&self.types)
            .filter(|(input, _)| !input.indexed)
            .map(|(_, ty)| ty.clone())
            .collect();
        let mut body = match DynSolType::Tuple(body_types).abi_decode_sequence(data).ok()? {
            DynSolValue::Tuple(values) => values.into_iter(),
            _ => return None,
        };
        let mut topics = topics.iter();

        let mut params = Map::new();
        for (position, (input, ty)) in self.inputs.iter().zip(&self.types).enumerate() {
            let value = if input.indexed {
                topic_value(ty, topics.next()?)
            } else {
                body.next()?
            };
            let key = if input.name.is_empty() {
                format!("arg{position}")
            } else {
                input.name.clone()
            };
            params.insert(key, to_json(&value, &input.components));
        }

        Some(DecodedEvent {
            event_name: self.name.clone(),
            params,
        })
    }
}

/// Indexed parameters are one word each. Dynamic types are stored as their
/// keccak hash, which is all the topic carries.
fn topic_value(ty: &DynSolType, topic: &B256) -> DynSolValue {
    match ty {
        DynSolType::Address => DynSolValue::Address(Address::from_word(*topic)),
        DynSolType::Bool => DynSolValue::Bool(topic[31] != 0),
        DynSolType::Uint(bits) => DynSolValue::Uint(U256::from_be_bytes(topic.0), *bits),
        DynSolType::Int(bits) => {
            DynSolValue::Int(I256::from_raw(U256::from_be_bytes(topic.0)), *bits)
        }
        DynSolType::FixedBytes(size) => DynSolValue::FixedBytes(*topic, *size),
        _ => DynSolValue::FixedBytes(*topic, 32),
    }
}

/// Resolves a JSON ABI type string (with tuple components) into a decoder type.
fn param_type(ty: &str, components: &[Param]) -> Result<DynSolType, AbiError> {
    let unsupported = || AbiError::UnsupportedType(ty.to_string());

    if let Some(stripped) = ty.strip_suffix(']') {
        let open = stripped.rfind('[').ok_or_else(unsupported)?;
        let inner = param_type(&stripped[..open], components)?;
        let size = &stripped[open + 1..];
        return if size.is_empty() {
            Ok(DynSolType::Array(Box::new(inner)))
        } else {
            let size = size.parse().map_err(|_| unsupported())?;
            Ok(DynSolType::FixedArray(Box::new(inner), size))
        };
    }

    match ty {
        "address" => Ok(DynSolType::Address),
        "bool" => Ok(DynSolType::Bool),
        "string" => Ok(DynSolType::String),
        "bytes" => Ok(DynSolType::Bytes),
        "tuple" => components
            .iter()
            .map(|component| param_type(&component.ty, &component.components))
            .collect::<Result<Vec<_>, _>>()
            .map(DynSolType::Tuple),
        _ => {
            if let Some(size) = ty.strip_prefix("bytes") {
                let size: usize = size.parse().map_err(|_| unsupported())?;
                if !(1..=32).contains(&size) {
                    return Err(unsupported());
                }
                return Ok(DynSolType::FixedBytes(size));
            }
            if let Some(bits) = ty.strip_prefix("uint") {
                return Ok(DynSolType::Uint(int_bits(bits).ok_or_else(unsupported)?));
            }
            if let Some(bits) = ty.strip_prefix("int") {
                return Ok(DynSolType::Int(int_bits(bits).ok_or_else(unsupported)?));
            }
            Err(unsupported())
        }
    }
}

fn int_bits(bits: &str) -> Option<usize> {
    if bits.is_empty() {
        return Some(256);
    }
    let bits: usize = bits.parse().ok()?;
    (bits % 8 == 0 && (8..=256).contains(&bits)).then_some(bits)
}

/// Numbers become decimal strings so values above 2^53 survive JSON.
fn to_json(value: &DynSolValue, components: &[Param]) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(address) => Value::String(format!("{address:#x}")),
        DynSolValue::Function(function) => Value::String(hex::encode_prefixed(function.as_slice())),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json(item, components))
                .collect(),
        ),
        DynSolValue::Tuple(items) => {
            let named = components.len() == items.len()
                && components.iter().all(|component| !component.name.is_empty());
            if named {
                Value::Object(
                    components
                        .iter()
                        .zip(items)
                        .map(|(component, item)| {
                            (component.name.clone(), to_json(item, &component.components))
                        })
                        .collect(),
                )
            } else {
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let nested = components
                                .get(i)
                                .map(|component| component.components.as_slice())
                                .unwrap_or_default();
                            to_json(item, nested)
                        })
                        .collect(),
                )
            }
        }
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{other:?}")),
    }
}

//! Opcode-keyed decoder table.
//!
//! Model layers register one decoder per opcode and hand access PDUs to
//! [`OpcodeTable::dispatch`], which splits the opcode off and routes the
//! parameters.

use crate::error::WireError;
use crate::opcode::Opcode;
use std::collections::HashMap;
use tracing::trace;

/// Parameter decoder for a single opcode
pub type DecodeFn<M> = fn(&[u8]) -> Result<M, WireError>;

struct Registration<M> {
    name: &'static str,
    min_len: usize,
    decode: DecodeFn<M>,
}

/// Table mapping opcodes to parameter decoders producing `M`
pub struct OpcodeTable<M> {
    entries: HashMap<Opcode, Registration<M>>,
}

impl<M> OpcodeTable<M> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a decoder. Parameters shorter than `min_len` are rejected
    /// before the decoder runs.
    pub fn register(
        &mut self,
        opcode: Opcode,
        name: &'static str,
        min_len: usize,
        decode: DecodeFn<M>,
    ) -> &mut Self {
        self.entries.insert(
            opcode,
            Registration {
                name,
                min_len,
                decode,
            },
        );
        self
    }

    /// Whether a decoder is registered for `opcode`
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.entries.contains_key(&opcode)
    }

    /// Registered message name
    pub fn name(&self, opcode: Opcode) -> Option<&'static str> {
        self.entries.get(&opcode).map(|r| r.name)
    }

    /// Registered opcodes in ascending order
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut opcodes: Vec<_> = self.entries.keys().copied().collect();
        opcodes.sort();
        opcodes
    }

    /// Decode the parameters of an already-split message
    pub fn decode_parameters(&self, opcode: Opcode, parameters: &[u8]) -> Result<M, WireError> {
        let registration = self
            .entries
            .get(&opcode)
            .ok_or(WireError::UnknownOpcode(opcode))?;

        if parameters.len() < registration.min_len {
            return Err(WireError::MalformedPayload(format!(
                "{} needs at least {} parameter bytes, got {}",
                registration.name,
                registration.min_len,
                parameters.len()
            )));
        }

        trace!("Decoding {} ({})", registration.name, opcode);
        (registration.decode)(parameters)
    }

    /// Split the opcode off an access PDU and decode its parameters
    pub fn dispatch(&self, pdu: &[u8]) -> Result<(Opcode, M), WireError> {
        let (opcode, width) = Opcode::decode(pdu)?;
        let message = self.decode_parameters(opcode, &pdu[width..])?;
        Ok((opcode, message))
    }
}

impl<M> Default for OpcodeTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for OpcodeTable<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcodeTable")
            .field("opcodes", &self.opcodes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Msg {
        Level(u8),
        Empty,
    }

    fn decode_level(params: &[u8]) -> Result<Msg, WireError> {
        Ok(Msg::Level(params[0]))
    }

    fn decode_empty(_: &[u8]) -> Result<Msg, WireError> {
        Ok(Msg::Empty)
    }

    fn table() -> OpcodeTable<Msg> {
        let mut table = OpcodeTable::new();
        table
            .register(Opcode::short(0x52), "Level", 1, decode_level)
            .register(Opcode::sig(0x8231), "Empty", 0, decode_empty);
        table
    }

    #[test]
    fn test_dispatch_routes_by_opcode() {
        let table = table();
        assert_eq!(
            table.dispatch(&[0x52, 0x07]).unwrap(),
            (Opcode::short(0x52), Msg::Level(7))
        );
        assert_eq!(
            table.dispatch(&[0x82, 0x31]).unwrap(),
            (Opcode::sig(0x8231), Msg::Empty)
        );
    }

    #[test]
    fn test_dispatch_unknown_opcode() {
        let err = table().dispatch(&[0x53, 0x00]).unwrap_err();
        assert!(err.is_unknown_opcode());
    }

    #[test]
    fn test_min_len_checked_before_decoder() {
        assert!(matches!(
            table().dispatch(&[0x52]),
            Err(WireError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_opcodes_sorted() {
        let table = table();
        assert_eq!(
            table.opcodes(),
            vec![Opcode::short(0x52), Opcode::sig(0x8231)]
        );
        assert_eq!(table.name(Opcode::short(0x52)), Some("Level"));
    }
}

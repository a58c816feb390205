//! Incremental TNEF decoding interface.
//!
//! A decoder is fed raw container bytes chunk by chunk and reports each
//! embedded part through three callbacks on a [`PartHandler`]: start, data
//! (in order, with the part-relative offset), end.

pub mod decoder;

use std::sync::Arc;

use crate::error::Result;
use crate::model::part::{MessageHeader, PartHeader};

/// Receives the parts a decoder recognises.
pub trait PartHandler {
    /// A new part begins.
    fn on_part_start(&mut self, header: PartHeader);
    /// A fragment of the current part's payload.
    fn on_part_data(&mut self, offset: u64, data: &[u8]);
    /// The current part is complete.
    fn on_part_end(&mut self);
}

/// An incremental TNEF decoder.
pub trait TnefDecoder: Send {
    /// Consume one chunk. Chunks may split the input at any byte.
    fn feed(&mut self, chunk: &[u8], handler: &mut dyn PartHandler) -> Result<()>;
    /// The transport has finished; report truncated input.
    fn finish(&mut self, handler: &mut dyn PartHandler) -> Result<()>;
}

/// Builds a fresh decoder for each stream session.
pub type DecoderFactory =
    Arc<dyn Fn(Option<&MessageHeader>) -> Box<dyn TnefDecoder> + Send + Sync>;

/// Factory for the built-in [`decoder::StreamDecoder`].
pub fn default_decoder_factory() -> DecoderFactory {
    Arc::new(|header: Option<&MessageHeader>| {
        Box::new(decoder::StreamDecoder::new(header)) as Box<dyn TnefDecoder>
    })
}

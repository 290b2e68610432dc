//! Site decoder seam
//!
//! Wire formats are site-specific and live outside this crate. A decoder is
//! handed the raw response body and feeds one draft per observed post into
//! the accumulator, which takes care of ordering and the staleness skip.

use async_trait::async_trait;

use crate::error::Result;
use crate::loader::PostAccumulator;

/// Decodes a site's thread/catalog payload into post drafts.
#[async_trait]
pub trait SiteDecoder: Send + Sync {
    /// Decode a thread response body, feeding every post into `accumulator`.
    async fn decode_thread(&self, body: &[u8], accumulator: &PostAccumulator) -> Result<()>;

    /// Decode a catalog response body, feeding every OP into `accumulator`
    /// in the server's display order.
    async fn decode_catalog(&self, body: &[u8], accumulator: &PostAccumulator) -> Result<()>;
}

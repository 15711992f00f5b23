use tokio::io::AsyncReadExt;

use super::{ByteStream, Fetcher};
use crate::descriptor::Descriptor;
use crate::errors::Error;

/// Drain a stream and verify it against the descriptor. Reading is capped at
/// one byte past the declared size so an over-long stream is detected without
/// buffering it whole.
pub(crate) async fn read_verified(
    expected: &Descriptor,
    content: ByteStream,
) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    let mut limited = content.take(expected.size.saturating_add(1));
    limited.read_to_end(&mut buffer).await?;

    if buffer.len() as u64 != expected.size {
        return Err(Error::MismatchedSize {
            expected: expected.size,
            actual: buffer.len() as u64,
        });
    }
    expected.digest.verify(&buffer)?;
    Ok(buffer)
}

pub(crate) async fn fetch_verified(
    fetcher: &dyn Fetcher,
    target: &Descriptor,
) -> Result<Vec<u8>, Error> {
    let content = fetcher.fetch(target).await?;
    read_verified(target, content).await
}

/// Failures of the line pipeline itself. End of input is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading input")]
    Read(#[source] std::io::Error),
    #[error("failed writing output")]
    Write(#[source] std::io::Error),
    #[error("item stream closed while the source was still producing")]
    SinkClosed,
}

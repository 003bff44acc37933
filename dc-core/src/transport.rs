//! Outbound side of a data channel.

use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel transport closed")]
    Closed,
    #[error("transport: {0}")]
    Other(String),
}

/// Accepts outbound buffers for one channel, in order.
pub trait Transport: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

impl Transport for UnboundedSender<Vec<u8>> {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        UnboundedSender::send(self, bytes).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_forwards_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        Transport::send(&tx, b"a".to_vec()).unwrap();
        Transport::send(&tx, b"b".to_vec()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"a");
        assert_eq!(rx.try_recv().unwrap(), b"b");
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        drop(rx);
        assert!(matches!(
            Transport::send(&tx, vec![1]),
            Err(TransportError::Closed)
        ));
    }
}

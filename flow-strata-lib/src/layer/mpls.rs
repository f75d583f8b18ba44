use smallvec::SmallVec;

use crate::layer::{LayerContext, Protocol, ProtocolStats};
use crate::packet::protocol::EtherProto;
use crate::packet::tunnel::mpls::{detect_inner_protocol, MplsLabel, MPLS_MAX_LABELS};
use crate::packet::{HeaderError, HeaderView, PacketHeader};

/// MPLS label stack, walked down to the bottom-of-stack label.
///
/// The payload type is guessed from the first nibble after the stack; an
/// unknown payload leaves the layer terminal.
#[derive(Debug, Default)]
pub struct MplsProtocol {
    labels: SmallVec<[MplsLabel; 4]>,
    inner: Option<EtherProto>,
    stats: ProtocolStats,
}

impl MplsProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top label of the stack.
    #[inline]
    pub fn label(&self) -> Option<u32> {
        self.labels.first().map(|l| l.label())
    }

    #[inline]
    pub fn labels(&self) -> &[MplsLabel] {
        &self.labels
    }

    #[inline]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }
}

impl Protocol for MplsProtocol {
    fn name(&self) -> &'static str {
        "mpls"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.labels.clear();
        self.inner = None;

        let mut rest = *view;
        for _ in 0..MPLS_MAX_LABELS {
            let label = *rest.header::<MplsLabel>()?;
            self.labels.push(label);
            rest = rest.advance(MplsLabel::FIXED_LEN)?;
            if label.is_bottom_of_stack() {
                self.inner = detect_inner_protocol(rest.bytes());
                return Ok(());
            }
        }
        Err(HeaderError::Invalid(MplsLabel::NAME))
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, _ctx: &mut LayerContext<'_>) -> bool {
        self.stats.accept(view.len());
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        self.inner.map(|p| p.value())
    }

    fn header_length(&self) -> usize {
        self.labels.len() * MplsLabel::FIXED_LEN
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[test]
    fn test_two_labels_then_ipv4() {
        let bytes = vec![
            0x00, 0x01, 0x00, 0x40, // label 16, S=0
            0x00, 0x02, 0x01, 0x40, // label 32, S=1
            0x45, 0x00, 0x00, 0x14,
        ];
        let view = Packet::new(&bytes).view();
        let mut mpls = MplsProtocol::new();
        assert!(mpls.check(&view));
        assert_eq!(mpls.label(), Some(16));
        assert_eq!(mpls.label_count(), 2);
        assert_eq!(mpls.header_length(), 8);
        assert_eq!(mpls.next_identifier(), Some(EtherProto::IPV4.value()));
        assert_eq!(mpls.upper_view(&view).unwrap().offset(), 8);
    }

    #[test]
    fn test_missing_bottom_of_stack() {
        let bytes = vec![0x00, 0x01, 0x00, 0x40, 0x00, 0x02, 0x00, 0x40];
        let mut mpls = MplsProtocol::new();
        assert!(!mpls.check(&Packet::new(&bytes).view()));
        assert_eq!(mpls.stats().invalid_packets, 1);
    }

    #[test]
    fn test_unknown_payload_is_terminal() {
        let bytes = vec![0x00, 0x01, 0x01, 0x40, 0x00, 0x00];
        let mut mpls = MplsProtocol::new();
        assert!(mpls.check(&Packet::new(&bytes).view()));
        assert_eq!(mpls.next_identifier(), None);
    }
}

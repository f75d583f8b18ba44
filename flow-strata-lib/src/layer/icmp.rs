use crate::layer::{CounterMap, LayerContext, Protocol, ProtocolStats};
use crate::packet::icmp::{IcmpHeader, IcmpType};
use crate::packet::{HeaderError, HeaderView, PacketHeader};

/// ICMP layer, terminal.
#[derive(Debug, Default)]
pub struct IcmpProtocol {
    header: Option<IcmpHeader>,
    errors: u64,
    stats: ProtocolStats,
}

impl IcmpProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn icmp_type(&self) -> Option<IcmpType> {
        self.header.map(|h| h.icmp_type())
    }

    #[inline]
    pub fn code(&self) -> Option<u8> {
        self.header.map(|h| h.code())
    }
}

impl Protocol for IcmpProtocol {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<IcmpHeader>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, _ctx: &mut LayerContext<'_>) -> bool {
        self.stats.accept(view.len());
        if self.icmp_type().is_some_and(|t| t.is_error()) {
            self.errors += 1;
            self.stats.events += 1;
        }
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        None
    }

    fn header_length(&self) -> usize {
        IcmpHeader::FIXED_LEN
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }

    fn counters(&self) -> CounterMap {
        let mut counters = self.stats.counters();
        counters.push("errors", self.errors);
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::test_support::{run, tables};
    use crate::layer::DecodeState;
    use crate::packet::Packet;

    #[test]
    fn test_icmp_error_counts_event() {
        let bytes = vec![
            0x0b, 0x00, 0x00, 0x00, // time exceeded
            0x00, 0x00, 0x00, 0x00,
        ];
        let mut icmp = IcmpProtocol::new();
        assert!(run(&mut icmp, &Packet::new(&bytes).view(), &mut tables(1), &mut DecodeState::default()));
        assert_eq!(icmp.icmp_type(), Some(IcmpType::TIME_EXCEEDED));
        assert_eq!(icmp.code(), Some(0));
        assert_eq!(icmp.stats().events, 1);
        assert_eq!(icmp.next_identifier(), None);
    }
}

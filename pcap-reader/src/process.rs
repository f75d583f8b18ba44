use std::fs::File;
use std::path::Path;
use std::time::Instant;

use flow_strata::metadata::PacketMetadata;
use flow_strata::packet::Packet;
use flow_strata::stack::NetworkStack;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::*;
use tracing::{debug, info};

/// What a capture run fed into the stack.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ReadSummary {
    pub packets: u64,
    pub bytes: u64,
    pub elapsed_secs: f64,
}

impl ReadSummary {
    pub fn packets_per_sec(&self) -> f64 {
        self.packets as f64 / self.elapsed_secs
    }

    pub fn gbps(&self) -> f64 {
        (self.bytes as f64 * 8.0) / (self.elapsed_secs * 1_000_000_000.0)
    }
}

#[inline]
fn inject<M: PacketMetadata>(
    stack: &mut NetworkStack,
    summary: &mut ReadSummary,
    meta: &M,
    dump_packet: bool,
) {
    summary.packets += 1;
    summary.bytes += meta.caplen() as u64;

    let packet = Packet::from_metadata(meta);
    if dump_packet {
        println!(
            "{:>5}   {} ({} bytes)",
            summary.packets,
            packet.timestamp(),
            packet.len()
        );
    }
    stack.inject(&packet);
}

/// Reads a PCAPNG or legacy PCAP file packet by packet into `stack`.
pub fn process_pcap(
    pcap_path: &Path,
    stack: &mut NetworkStack,
    dump_packet: bool,
) -> Result<ReadSummary, String> {
    let mut summary = ReadSummary::default();
    let start = Instant::now();

    let file = File::open(pcap_path).map_err(|e| format!("Failed to open {pcap_path:?}: {e}"))?;

    match PcapNGReader::new(65536, file) {
        Ok(mut reader) => {
            info!("Detected PCAPNG format");
            loop {
                match reader.next() {
                    Ok((offset, block)) => {
                        match block {
                            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                                inject(stack, &mut summary, &epb, dump_packet);
                            }
                            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                                inject(stack, &mut summary, &spb, dump_packet);
                            }
                            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                                debug!("PCAPNG Section Header found");
                            }
                            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                                debug!(linktype = ?idb.linktype, "PCAPNG Interface Description found");
                            }
                            _ => {}
                        }
                        reader.consume(offset);
                    }
                    Err(PcapError::Eof) => break,
                    Err(PcapError::Incomplete(_)) => {
                        reader
                            .refill()
                            .map_err(|e| format!("Error refilling PCAPNG reader: {e:?}"))?;
                    }
                    Err(e) => {
                        return Err(format!("Error reading PCAPNG: {e:?}"));
                    }
                }
            }
        }
        Err(_) => {
            let file =
                File::open(pcap_path).map_err(|e| format!("Failed to open {pcap_path:?}: {e}"))?;

            let mut reader = LegacyPcapReader::new(65536, file)
                .map_err(|e| format!("Failed to create PCAP reader: {e:?}"))?;

            loop {
                match reader.next() {
                    Ok((offset, block)) => {
                        match block {
                            PcapBlockOwned::Legacy(packet) => {
                                inject(stack, &mut summary, &packet, dump_packet);
                            }
                            PcapBlockOwned::LegacyHeader(header) => {
                                debug!(network = ?header.network, "Legacy PCAP header found");
                            }
                            _ => {}
                        }
                        reader.consume(offset);
                    }
                    Err(PcapError::Eof) => break,
                    Err(PcapError::Incomplete(_)) => {
                        reader
                            .refill()
                            .map_err(|e| format!("Error refilling PCAP reader: {e:?}"))?;
                    }
                    Err(e) => {
                        return Err(format!("Error reading PCAP: {e:?}"));
                    }
                }
            }
        }
    }

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    Ok(summary)
}

//! Write buffer flush and overflow properties.

use std::io;

use chipwire::{Framing, HardwareLink, RegisterWrite, WriteBuffer};

/// Buffer capacity as built; mirrors the hardware write buffer size.
const CAPACITY: usize = 64 * 1024;
const CHUNK: usize = 4096;

struct CountingLink {
    calls: Vec<usize>,
}

impl HardwareLink for CountingLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.calls.push(bytes.len());
        Ok(bytes.len())
    }
}

/// Pushing two and a half buffer loads forces exactly two overflow
/// flushes, and the final explicit flush empties the rest: three
/// flushes total, every transmitted chunk at most 4096 bytes.
#[test]
fn test_overflow_flush_count() {
    let mut buf = WriteBuffer::new(CountingLink { calls: Vec::new() }, Framing::FourByte);

    let total = CAPACITY * 5 / 2;
    let writes = total / 4;
    for i in 0..writes {
        buf.push_write(RegisterWrite {
            slot: 0,
            port: 0,
            addr: 0x30,
            data: (i % 200) as u8 + 1,
        })
        .unwrap();
    }

    // Two whole buffer loads went out through forced flushes.
    assert_eq!(buf.pending(), total - 2 * CAPACITY);

    buf.flush().unwrap();
    assert_eq!(buf.pending(), 0);

    let link = buf_into_link(buf);
    assert_eq!(link.calls.iter().sum::<usize>(), total);
    assert!(link.calls.iter().all(|&c| c <= CHUNK));
    // ceil(total / chunk) transfers overall.
    assert_eq!(link.calls.len(), total.div_ceil(CHUNK));
}

fn buf_into_link(buf: WriteBuffer<CountingLink>) -> CountingLink {
    buf.into_link()
}

/// The all-zero pseudo-write never reaches the link even when mixed
/// into real traffic, and on a framing without no-op frames it
/// contributes no bytes at all.
#[test]
fn test_wait_marker_dropped_in_traffic() {
    let mut buf = WriteBuffer::new(CountingLink { calls: Vec::new() }, Framing::ThreeByte);
    buf.push_write(RegisterWrite {
        slot: 1,
        port: 0,
        addr: 0x28,
        data: 0x4A,
    })
    .unwrap();
    buf.push_wait_and_write(5, RegisterWrite::WAIT_MARKER).unwrap();
    buf.push_write(RegisterWrite {
        slot: 1,
        port: 0,
        addr: 0x08,
        data: 0x00,
    })
    .unwrap();
    buf.flush().unwrap();

    let link = buf_into_link(buf);
    // Two three-byte frames; the marker contributed nothing.
    assert_eq!(link.calls.iter().sum::<usize>(), 6);
}

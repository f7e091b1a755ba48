//! Fuzz-style property tests for the wire readers.
//!
//! Handshake blobs and discovery datagrams come from untrusted peers, so the
//! readers must reject garbage without panicking.

use livecapture_core::{WireReader, WireWriter};
use proptest::prelude::*;

proptest! {
    /// Property: arbitrary bytes never crash the string reader
    #[test]
    fn arbitrary_bytes_dont_crash_string_reader(
        random_bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut reader = WireReader::new(&random_bytes);
        while reader.read_string().is_ok() {}
    }

    /// Property: strings written are read back unchanged and fully consumed
    #[test]
    fn strings_survive_the_wire(value in ".{0,64}") {
        let mut buf = Vec::new();
        buf.write_string(&value);

        let mut reader = WireReader::new(&buf);
        prop_assert_eq!(reader.read_string().unwrap(), value);
        prop_assert_eq!(reader.remaining(), 0);
    }

    /// Property: a truncated buffer reports an error instead of reading garbage
    #[test]
    fn truncated_strings_are_rejected(value in ".{1,64}", cut in 1usize..8) {
        let mut buf = Vec::new();
        buf.write_string(&value);
        let cut = cut.min(buf.len());
        buf.truncate(buf.len() - cut);

        let mut reader = WireReader::new(&buf);
        prop_assert!(reader.read_string().is_err());
    }
}

use bytes::Bytes;
use crc::{Crc, CRC_32_ISCSI};

pub(crate) const PADDING_MULTIPLE: usize = 4;

pub(crate) fn get_padding_size(len: usize) -> usize {
    (PADDING_MULTIPLE - (len % PADDING_MULTIPLE)) % PADDING_MULTIPLE
}

/// Allocate and zero this data once.
/// We need to use it for the checksum and don't want to allocate/clear each time.
pub(crate) static FOUR_ZEROES: Bytes = Bytes::from_static(&[0, 0, 0, 0]);

/// CRC_32_ISCSI is the Castagnoli polynomial, which RFC 4960 Appendix B
/// mandates for the packet checksum.
pub(crate) const ISCSI_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Computes the packet checksum with the checksum field treated as zero,
/// without allocating.
pub(crate) fn generate_packet_checksum(raw: &Bytes) -> u32 {
    let mut digest = ISCSI_CRC.digest();
    digest.update(&raw[0..8]);
    digest.update(&FOUR_ZEROES[..]);
    digest.update(&raw[12..]);
    digest.finalize()
}

/// Serial Number Arithmetic (RFC 1982)
///
/// TSNs and reconfiguration sequence numbers wrap at 2^32 and stream
/// sequence numbers at 2^16; never compare them with the plain operators.
#[inline]
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 31) || (i1 > i2 && i1 - i2 > 1 << 31)
}

#[inline]
pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

#[inline]
pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 31) || (i1 > i2 && (i1 - i2) <= 1 << 31)
}

#[inline]
pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

#[inline]
pub(crate) fn sna16lt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) < 1 << 15) || (i1 > i2 && (i1 - i2) > 1 << 15)
}

#[inline]
pub(crate) fn sna16lte(i1: u16, i2: u16) -> bool {
    i1 == i2 || sna16lt(i1, i2)
}

#[inline]
pub(crate) fn sna16gt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 15) || (i1 > i2 && (i1 - i2) <= 1 << 15)
}

#[inline]
pub(crate) fn sna16gte(i1: u16, i2: u16) -> bool {
    i1 == i2 || sna16gt(i1, i2)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_crc32c_check_value() {
        // Known CRC32c check value for "123456789".
        let mut digest = ISCSI_CRC.digest();
        digest.update(b"123456789");
        assert_eq!(digest.finalize(), 0xe306_9283);
    }

    #[test]
    fn test_padding_size() {
        assert_eq!(get_padding_size(0), 0);
        assert_eq!(get_padding_size(1), 3);
        assert_eq!(get_padding_size(2), 2);
        assert_eq!(get_padding_size(3), 1);
        assert_eq!(get_padding_size(4), 0);
        assert_eq!(get_padding_size(5), 3);
    }

    #[test]
    fn test_serial_number_arithmetic32bit() {
        const DIV: u32 = 16;
        const INTERVAL: u32 = ((1u64 << 32) / (DIV as u64)) as u32;
        const MAX_FORWARD_DISTANCE: u32 = 1 << 30;
        const MAX_BACKWARD_DISTANCE: u32 = 1 << 31;

        for i in 0..DIV {
            let s1 = i.wrapping_mul(INTERVAL);
            let s2f = s1.wrapping_add(MAX_FORWARD_DISTANCE);
            let s2b = s1.wrapping_add(MAX_BACKWARD_DISTANCE);

            assert!(sna32lt(s1, s2f), "s1 < s2 should be true: s1={s1} s2={s2f}");
            assert!(!sna32lt(s1, s2b), "s1 < s2 should be false: s1={s1} s2={s2b}");
            assert!(!sna32gt(s1, s2f), "s1 > s2 should be false: s1={s1} s2={s2f}");
            assert!(sna32gt(s1, s2b), "s1 > s2 should be true: s1={s1} s2={s2b}");

            assert!(sna32lte(s1, s1), "s1 == s1 should be true: s1={s1}");
            assert!(sna32gte(s1, s1), "s1 == s1 should be true: s1={s1}");
        }
    }

    #[test]
    fn test_serial_number_arithmetic32bit_antisymmetry() {
        // a > b implies !(b > a) for all pairs inside a 2^31 window.
        let cases = [
            (0u32, 1u32),
            (1, 0),
            (u32::MAX, 0),
            (0, u32::MAX),
            (0x7fff_ffff, 0x8000_0000),
            (0xffff_fff0, 0x10),
        ];
        for (a, b) in cases {
            if sna32gt(a, b) {
                assert!(!sna32gt(b, a), "antisymmetry violated for a={a} b={b}");
            }
            if a != b {
                assert!(
                    sna32gt(a, b) || sna32gt(b, a),
                    "totality violated for a={a} b={b}"
                );
            }
        }
    }

    #[test]
    fn test_serial_number_arithmetic16bit() {
        const DIV: u16 = 16;
        const INTERVAL: u16 = ((1u64 << 16) / (DIV as u64)) as u16;
        const MAX_FORWARD_DISTANCE: u16 = 1 << 14;
        const MAX_BACKWARD_DISTANCE: u16 = 1 << 15;

        for i in 0..DIV {
            let s1 = i.wrapping_mul(INTERVAL);
            let s2f = s1.wrapping_add(MAX_FORWARD_DISTANCE);
            let s2b = s1.wrapping_add(MAX_BACKWARD_DISTANCE);

            assert!(sna16lt(s1, s2f), "s1 < s2 should be true: s1={s1} s2={s2f}");
            assert!(!sna16lt(s1, s2b), "s1 < s2 should be false: s1={s1} s2={s2b}");
            assert!(!sna16gt(s1, s2f), "s1 > s2 should be false: s1={s1} s2={s2f}");
            assert!(sna16gt(s1, s2b), "s1 > s2 should be true: s1={s1} s2={s2b}");

            assert!(sna16lte(s1, s1), "s1 == s1 should be true: s1={s1}");
            assert!(sna16gte(s1, s1), "s1 == s1 should be true: s1={s1}");
        }
    }

    #[test]
    fn test_ssn_wraparound_ordering() {
        assert!(sna16lt(65535, 0));
        assert!(sna16gt(0, 65535));
        assert!(sna16lt(65500, 100));
    }
}

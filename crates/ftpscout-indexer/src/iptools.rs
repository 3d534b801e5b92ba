//! IPv4 primitives for the scanner
//!
//! Addresses are 32-bit integers with a dotted-quad text form. Ranges are
//! inclusive pairs. An [`IpSet`] keeps its ranges sorted, disjoint and
//! non-adjacent so membership is a binary search and iteration is a simple
//! walk; [`IpSet::loop_iter_from`] wraps past the last range forever, which
//! is what lets the scheduler resume a scan from wherever it stopped.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Malformed IPv4 text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid IPv4 address {input:?}: {reason}")]
pub struct InvalidAddress {
    pub input: String,
    pub reason: &'static str,
}

impl InvalidAddress {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// An IPv4 address, ordered by its integer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ip(u32);

impl Ip {
    pub const fn new(num: u32) -> Self {
        Self(num)
    }

    pub const fn num(self) -> u32 {
        self.0
    }
}

impl From<Ipv4Addr> for Ip {
    fn from(addr: Ipv4Addr) -> Self {
        Self(u32::from(addr))
    }
}

impl From<Ip> for Ipv4Addr {
    fn from(ip: Ip) -> Self {
        Ipv4Addr::from(ip.0)
    }
}

impl FromStr for Ip {
    type Err = InvalidAddress;

    /// Accepts exactly four decimal octets in `[0, 255]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split('.').collect();
        if octets.len() != 4 {
            return Err(InvalidAddress::new(s, "not in IPv4 dotted-quad format"));
        }
        let mut num = 0u32;
        for octet in octets {
            if octet.is_empty() || !octet.bytes().all(|b| b.is_ascii_digit()) {
                return Err(InvalidAddress::new(s, "octet is not a decimal number"));
            }
            let value: u32 = octet
                .parse()
                .map_err(|_| InvalidAddress::new(s, "octet is not a decimal number"))?;
            if value > 255 {
                return Err(InvalidAddress::new(s, "octet not in [0-255]"));
            }
            num = (num << 8) | value;
        }
        Ok(Self(num))
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(self.0).fmt(f)
    }
}

/// An inclusive range of addresses with `first <= last`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    first: Ip,
    last: Ip,
}

impl IpRange {
    /// Build a range from its endpoints, swapping them if given backwards.
    pub fn new(a: Ip, b: Ip) -> Self {
        if a <= b {
            Self { first: a, last: b }
        } else {
            Self { first: b, last: a }
        }
    }

    pub fn single(ip: Ip) -> Self {
        Self {
            first: ip,
            last: ip,
        }
    }

    pub fn first(&self) -> Ip {
        self.first
    }

    pub fn last(&self) -> Ip {
        self.last
    }

    pub fn len(&self) -> u64 {
        u64::from(self.last.num()) - u64::from(self.first.num()) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, ip: Ip) -> bool {
        self.first <= ip && ip <= self.last
    }

    pub fn iter(&self) -> RangeIter {
        RangeIter {
            pos: u64::from(self.first.num()),
            last: u64::from(self.last.num()),
        }
    }

    /// Iterate from the larger of `ip` and the range start.
    pub fn iter_from(&self, ip: Ip) -> RangeIter {
        RangeIter {
            pos: u64::from(self.first.num().max(ip.num())),
            last: u64::from(self.last.num()),
        }
    }
}

impl IntoIterator for &IpRange {
    type Item = Ip;
    type IntoIter = RangeIter;

    fn into_iter(self) -> RangeIter {
        self.iter()
    }
}

/// Forward iterator over one range; `u64` cursor so `255.255.255.255` ends cleanly.
#[derive(Debug, Clone)]
pub struct RangeIter {
    pos: u64,
    last: u64,
}

impl Iterator for RangeIter {
    type Item = Ip;

    fn next(&mut self) -> Option<Ip> {
        if self.pos > self.last {
            return None;
        }
        let ip = Ip::new(self.pos as u32);
        self.pos += 1;
        Some(ip)
    }
}

/// Ordered set of disjoint, non-adjacent ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSet {
    ranges: Vec<IpRange>,
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    /// Insert a range, merging it with any neighbor it overlaps or touches.
    pub fn add(&mut self, range: IpRange) {
        let pos = self
            .ranges
            .partition_point(|r| r.first <= range.first);

        // Merge into the left neighbor when overlapping or adjacent.
        let current = if pos > 0
            && u64::from(range.first.num()) <= u64::from(self.ranges[pos - 1].last.num()) + 1
        {
            let left = &mut self.ranges[pos - 1];
            left.last = left.last.max(range.last);
            pos - 1
        } else {
            self.ranges.insert(pos, range);
            pos
        };

        // Absorb right neighbors while they overlap or touch.
        while current + 1 < self.ranges.len()
            && u64::from(self.ranges[current + 1].first.num())
                <= u64::from(self.ranges[current].last.num()) + 1
        {
            let right = self.ranges.remove(current + 1);
            let merged = &mut self.ranges[current];
            merged.last = merged.last.max(right.last);
        }
    }

    pub fn contains(&self, ip: Ip) -> bool {
        let pos = self.ranges.partition_point(|r| r.first <= ip);
        pos > 0 && self.ranges[pos - 1].contains(ip)
    }

    /// Total number of addresses over all ranges.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The smallest address in the set.
    pub fn first(&self) -> Option<Ip> {
        self.ranges.first().map(|r| r.first)
    }

    pub fn iter(&self) -> impl Iterator<Item = Ip> + '_ {
        self.ranges.iter().flat_map(|r| r.iter())
    }

    /// Infinite iterator starting at the smallest in-set address `>= ip`
    /// (or inside the range containing `ip`), wrapping from the last range
    /// back to the first. Yields nothing for an empty set.
    pub fn loop_iter_from(&self, ip: Ip) -> LoopIter<'_> {
        if self.ranges.is_empty() {
            return LoopIter {
                set: self,
                range_idx: 0,
                cursor: None,
            };
        }
        let pos = self.ranges.partition_point(|r| r.first <= ip);
        let (range_idx, start) = if pos > 0 && self.ranges[pos - 1].contains(ip) {
            (pos - 1, ip)
        } else {
            let idx = pos % self.ranges.len();
            (idx, self.ranges[idx].first)
        };
        LoopIter {
            set: self,
            range_idx,
            cursor: Some(u64::from(start.num())),
        }
    }
}

impl FromIterator<IpRange> for IpSet {
    fn from_iter<T: IntoIterator<Item = IpRange>>(iter: T) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.add(range);
        }
        set
    }
}

/// Cyclic iterator over an [`IpSet`]; see [`IpSet::loop_iter_from`].
#[derive(Debug, Clone)]
pub struct LoopIter<'a> {
    set: &'a IpSet,
    range_idx: usize,
    cursor: Option<u64>,
}

impl Iterator for LoopIter<'_> {
    type Item = Ip;

    fn next(&mut self) -> Option<Ip> {
        let pos = self.cursor?;
        let ip = Ip::new(pos as u32);
        let range = &self.set.ranges[self.range_idx];
        if pos + 1 > u64::from(range.last.num()) {
            self.range_idx = (self.range_idx + 1) % self.set.ranges.len();
            self.cursor = Some(u64::from(self.set.ranges[self.range_idx].first.num()));
        } else {
            self.cursor = Some(pos + 1);
        }
        Some(ip)
    }
}

/// One entry of a range configuration: a single address or an explicit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Addr(Ip),
    Range(Ip, Ip),
}

impl FromStr for RangeSpec {
    type Err = InvalidAddress;

    /// Accepts `a.b.c.d` or `a.b.c.d-e.f.g.h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('-') {
            Some((first, last)) => Ok(RangeSpec::Range(
                first.trim().parse()?,
                last.trim().parse()?,
            )),
            None => Ok(RangeSpec::Addr(s.parse()?)),
        }
    }
}

/// Normalize a heterogeneous range configuration into an [`IpSet`].
///
/// Exactly two bare addresses at the top level are folded into a single
/// range, with a warning; this historical reading predates explicit range
/// syntax and existing configurations rely on it.
pub fn parse_ip_ranges(specs: &[RangeSpec]) -> IpSet {
    if let [RangeSpec::Addr(first), RangeSpec::Addr(last)] = specs {
        warn!(
            "got two addresses, assuming the range {}-{} rather than two \
             distinct addresses; write it as \"{}-{}\" to silence this warning",
            first, last, first, last
        );
        let mut set = IpSet::new();
        set.add(IpRange::new(*first, *last));
        return set;
    }

    let mut set = IpSet::new();
    for spec in specs {
        match *spec {
            RangeSpec::Addr(ip) => set.add(IpRange::single(ip)),
            RangeSpec::Range(first, last) => set.add(IpRange::new(first, last)),
        }
    }
    set
}

/// Parse a comma-separated range configuration, e.g.
/// `"10.8.0.0-10.8.255.255, 192.168.1.12"`.
pub fn parse_ip_ranges_str(input: &str) -> Result<IpSet, InvalidAddress> {
    let specs = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RangeSpec::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parse_ip_ranges(&specs))
}

//! Partition of a pairwise alignment into block-sized segments.
//!
//! The CIGAR is walked left to right. Match runs accumulate into matched
//! segments; indel runs shorter than `minblock` stay inside the enclosing
//! matched segment as local hunks, longer runs split it and become segments
//! of their own. Whatever the alignment does not cover is emitted as
//! qry-only or ref-only segments from the interval complement.

use std::ops::Range;

use interval_set::IntervalSet;

use crate::alignment::{Alignment, CigarOp};
use crate::error::{Error, Result};

/// One hunk of a matched segment's interior correspondence. Counts are in
/// walk order; the cursors implied by the preceding hunks locate them.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Hunk {
    /// Both consensi advance together.
    Aligned(usize),
    /// The query carries bytes the reference lacks (a local insertion).
    QryOnly(usize),
    /// The reference carries bytes the query lacks (a local deletion).
    RefOnly(usize),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Segment {
    QryOnly(Range<usize>),
    RefOnly(Range<usize>),
    Matched {
        qry: Range<usize>,
        reference: Range<usize>,
        interior: Vec<Hunk>,
    },
}

impl Segment {
    pub(crate) fn qry_range(&self) -> Option<Range<usize>> {
        match self {
            Segment::QryOnly(range) => Some(range.clone()),
            Segment::RefOnly(_) => None,
            Segment::Matched { qry, .. } => Some(qry.clone()),
        }
    }

    pub(crate) fn ref_range(&self) -> Option<Range<usize>> {
        match self {
            Segment::QryOnly(_) => None,
            Segment::RefOnly(range) => Some(range.clone()),
            Segment::Matched { reference, .. } => Some(reference.clone()),
        }
    }
}

struct MatchedBuilder {
    qry_start: usize,
    ref_start: usize,
    interior: Vec<Hunk>,
}

/// Cut both blocks along `alignment` into an ordered list of segments.
/// `alignment` must already be oriented (forward strand).
pub(crate) fn partition(alignment: &Alignment, minblock: usize) -> Result<Vec<Segment>> {
    let malformed = |detail: String| Error::MalformedAlignment {
        qry: alignment.qry.name.clone(),
        reference: alignment.reference.name.clone(),
        detail,
    };
    if alignment.qry.stop > alignment.qry.length
        || alignment.reference.stop > alignment.reference.length
        || alignment.cigar.query_len() != alignment.qry.stop - alignment.qry.start
        || alignment.cigar.reference_len() != alignment.reference.stop - alignment.reference.start
    {
        return Err(malformed(
            "the CIGAR does not tile the aligned intervals".into(),
        ));
    }

    let mut segments = Vec::new();
    let mut covered_qry = IntervalSet::new();
    let mut covered_ref = IntervalSet::new();
    let mut qry_cursor = alignment.qry.start;
    let mut ref_cursor = alignment.reference.start;
    let mut builder: Option<MatchedBuilder> = None;

    let close =
        |builder: Option<MatchedBuilder>, segments: &mut Vec<Segment>, qry_end, ref_end| {
            if let Some(closed) = builder {
                segments.push(Segment::Matched {
                    qry: closed.qry_start..qry_end,
                    reference: closed.ref_start..ref_end,
                    interior: closed.interior,
                });
            }
        };

    for (count, op) in alignment.cigar.iter() {
        match op {
            CigarOp::Match => {
                builder
                    .get_or_insert_with(|| MatchedBuilder {
                        qry_start: qry_cursor,
                        ref_start: ref_cursor,
                        interior: Vec::new(),
                    })
                    .interior
                    .push(Hunk::Aligned(count));
                covered_qry.add(qry_cursor..qry_cursor + count);
                covered_ref.add(ref_cursor..ref_cursor + count);
                qry_cursor += count;
                ref_cursor += count;
            }
            CigarOp::Insertion => {
                // A leading insertion has no reference base to anchor in
                // front of, so it always becomes its own segment.
                if count >= minblock || builder.is_none() {
                    close(builder.take(), &mut segments, qry_cursor, ref_cursor);
                    segments.push(Segment::QryOnly(qry_cursor..qry_cursor + count));
                } else {
                    builder.as_mut().unwrap().interior.push(Hunk::QryOnly(count));
                }
                covered_qry.add(qry_cursor..qry_cursor + count);
                qry_cursor += count;
            }
            CigarOp::Deletion => {
                if count >= minblock {
                    close(builder.take(), &mut segments, qry_cursor, ref_cursor);
                    segments.push(Segment::RefOnly(ref_cursor..ref_cursor + count));
                } else {
                    builder
                        .get_or_insert_with(|| MatchedBuilder {
                            qry_start: qry_cursor,
                            ref_start: ref_cursor,
                            interior: Vec::new(),
                        })
                        .interior
                        .push(Hunk::RefOnly(count));
                }
                covered_ref.add(ref_cursor..ref_cursor + count);
                ref_cursor += count;
            }
        }
    }
    close(builder.take(), &mut segments, qry_cursor, ref_cursor);

    if qry_cursor != alignment.qry.stop || ref_cursor != alignment.reference.stop {
        return Err(malformed("the CIGAR walk misses the hit endpoints".into()));
    }

    for range in covered_qry.complement(0..alignment.qry.length).iter() {
        segments.push(Segment::QryOnly(range));
    }
    for range in covered_ref.complement(0..alignment.reference.length).iter() {
        segments.push(Segment::RefOnly(range));
    }

    Ok(segments)
}

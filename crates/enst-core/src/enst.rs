//! Energy-normalized throughput: work units per joule.

use crate::tsv::TsvRecord;
use crate::work_units::{DEFAULT_GPU_WEIGHT, WorkUnitsKind, WorkUnitsMode, compute_work_units};

/// `work_units / energy_j`, or `None` unless energy is positive and work is present.
///
/// Zero work over positive energy is a valid `0.0`; anything over zero or
/// missing energy is undefined.
pub fn compute_enst(record: &TsvRecord) -> Option<f64> {
    let energy = record.energy_j.filter(|e| *e > 0.0)?;
    let work = record.work_units?;
    Some(work / energy)
}

/// Options for [`compute_enst_stream`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnstOptions {
    pub mode: WorkUnitsMode,
    pub gpu_weight: f64,
}

impl Default for EnstOptions {
    fn default() -> Self {
        Self {
            mode: WorkUnitsMode::Infra,
            gpu_weight: DEFAULT_GPU_WEIGHT,
        }
    }
}

/// Fill `work_units`, `work_units_mode`, `validated_work_units` and `enst` on one record.
pub fn annotate(record: &mut TsvRecord, options: &EnstOptions) {
    let work = compute_work_units(record, options.mode, options.gpu_weight);
    record.work_units = Some(work.value);
    record.work_units_mode = Some(work.mode);
    record.validated_work_units = (work.mode == WorkUnitsKind::Domain).then_some(work.value);
    record.enst = compute_enst(record);
}

/// Lazy, order-preserving adapter: one annotated record out per record in.
#[derive(Debug, Clone)]
pub struct EnstStream<I> {
    inner: I,
    options: EnstOptions,
}

impl<I> Iterator for EnstStream<I>
where
    I: Iterator<Item = TsvRecord>,
{
    type Item = TsvRecord;

    fn next(&mut self) -> Option<TsvRecord> {
        let mut record = self.inner.next()?;
        annotate(&mut record, &self.options);
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Wrap a record stream so each item gains work units and ENST.
pub fn compute_enst_stream<I>(records: I, options: EnstOptions) -> EnstStream<I::IntoIter>
where
    I: IntoIterator<Item = TsvRecord>,
{
    EnstStream {
        inner: records.into_iter(),
        options,
    }
}

/// Method form of [`compute_enst_stream`].
pub trait EnstStreamExt: Iterator<Item = TsvRecord> + Sized {
    fn enst_stream(self, options: EnstOptions) -> EnstStream<Self> {
        EnstStream {
            inner: self,
            options,
        }
    }
}

impl<I: Iterator<Item = TsvRecord>> EnstStreamExt for I {}

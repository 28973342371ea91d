use crate::associations::{BlockAssociations, SlotKey};
use crate::chunking::BlockDefn;
use crate::error::Result;
use crate::pixelgrid::PixelGridDefn;
use std::collections::BTreeMap;

/// What stays the same for every block of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub working_grid: PixelGridDefn,
    pub margin: usize,
    pub total_blocks: usize,
    /// Nodata per band of every input.
    pub nodata: BTreeMap<SlotKey, Vec<Option<f64>>>,
}

/// Read-only context handed to a transform with each block.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo<'a> {
    run: &'a RunInfo,
    index: usize,
    block: BlockDefn,
}

impl<'a> BlockInfo<'a> {
    pub fn new(run: &'a RunInfo, index: usize, block: BlockDefn) -> Self {
        Self { run, index, block }
    }

    pub fn working_grid(&self) -> &PixelGridDefn {
        &self.run.working_grid
    }

    /// The block proper, in working grid pixels, without margin.
    pub fn block(&self) -> BlockDefn {
        self.block
    }

    /// Position of this block in partition order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn total_blocks(&self) -> usize {
        self.run.total_blocks
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.run.total_blocks
    }

    pub fn margin(&self) -> usize {
        self.run.margin
    }

    /// Nodata per band of an input, `None` for a slot that was not declared.
    pub fn nodata(&self, key: &SlotKey) -> Option<&[Option<f64>]> {
        self.run.nodata.get(key).map(Vec::as_slice)
    }

    /// Nodata of band 1 of a single-file input.
    pub fn input_nodata(&self, name: &str) -> Option<f64> {
        self.nodata(&SlotKey::single(name))
            .and_then(|bands| bands.first().copied().flatten())
    }

    /// World bounds `(xmin, ymin, xmax, ymax)` of the block proper.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.run.working_grid.window_bounds(
            self.block.top as i64,
            self.block.left as i64,
            self.block.nrows,
            self.block.ncols,
        )
    }

    /// World bounds of the arrays handed to the transform, margin included.
    pub fn read_bounds(&self) -> (f64, f64, f64, f64) {
        let (top, left, rows, cols) = self.block.read_window(self.run.margin);
        self.run.working_grid.window_bounds(top, left, rows, cols)
    }
}

/// A computation run once per block.
///
/// `inputs` holds one `(bands, rows + 2*margin, cols + 2*margin)` array per
/// input file. The transform fills `outputs` with one array per output slot,
/// of the same rows and columns; the margin is trimmed off before writing.
pub trait BlockTransform: Send + Sync {
    fn apply(&self, info: &BlockInfo, inputs: &BlockAssociations, outputs: &mut BlockAssociations) -> Result<()>;
}

impl<F> BlockTransform for F
where
    F: Fn(&BlockInfo, &BlockAssociations, &mut BlockAssociations) -> Result<()> + Send + Sync,
{
    fn apply(&self, info: &BlockInfo, inputs: &BlockAssociations, outputs: &mut BlockAssociations) -> Result<()> {
        self(info, inputs, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::BlockArray;
    use ndarray::Array3;

    fn run_info() -> RunInfo {
        let mut nodata = BTreeMap::new();
        nodata.insert(SlotKey::single("dem"), vec![Some(-9999.0), None]);
        RunInfo {
            working_grid: PixelGridDefn::new("", 0.0, 100.0, 0.0, 50.0, 10.0, 10.0).unwrap(),
            margin: 1,
            total_blocks: 4,
            nodata,
        }
    }

    #[test]
    fn test_block_info_bounds() {
        let run = run_info();
        let block = BlockDefn {
            top: 2,
            left: 3,
            nrows: 2,
            ncols: 4,
        };
        let info = BlockInfo::new(&run, 3, block);
        assert!(info.is_last());
        assert_eq!(info.bounds(), (30.0, 10.0, 70.0, 30.0));
        assert_eq!(info.read_bounds(), (20.0, 0.0, 80.0, 40.0));
        assert_eq!(info.input_nodata("dem"), Some(-9999.0));
        assert_eq!(info.nodata(&SlotKey::single("dem")).unwrap()[1], None);
        assert_eq!(info.input_nodata("other"), None);
    }

    #[test]
    fn test_closure_is_a_transform() {
        let double = |_: &BlockInfo, inputs: &BlockAssociations, outputs: &mut BlockAssociations| -> Result<()> {
            let a = inputs.array("a")?.get::<u8>().unwrap();
            outputs.set("out", a.mapv(|v| v * 2));
            Ok(())
        };

        let run = run_info();
        let info = BlockInfo::new(&run, 0, BlockDefn { top: 0, left: 0, nrows: 1, ncols: 2 });
        let mut inputs = BlockAssociations::new();
        inputs.set("a", Array3::from_elem((1, 1, 2), 3u8));
        let mut outputs = BlockAssociations::new();

        let transform: &dyn BlockTransform = &double;
        transform.apply(&info, &inputs, &mut outputs).unwrap();
        assert_eq!(outputs.array("out").unwrap(), &BlockArray::from(Array3::from_elem((1, 1, 2), 6u8)));
    }
}

use log::debug;

/// One rectangle of the working grid, in working-grid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDefn {
    pub top: usize,
    pub left: usize,
    pub nrows: usize,
    pub ncols: usize,
}

impl BlockDefn {
    pub fn bottom(&self) -> usize {
        self.top + self.nrows
    }

    pub fn right(&self) -> usize {
        self.left + self.ncols
    }

    /// The block grown by `margin` on every side, as `(top, left, nrows, ncols)`.
    /// The window may start at negative coordinates.
    pub fn read_window(&self, margin: usize) -> (i64, i64, usize, usize) {
        (
            self.top as i64 - margin as i64,
            self.left as i64 - margin as i64,
            self.nrows + 2 * margin,
            self.ncols + 2 * margin,
        )
    }
}

/// Fixed-size tiling of a `ncols` x `nrows` grid.
pub struct BlockPartition {
    raster_width: usize,
    raster_height: usize,
    block_width: usize,
    block_height: usize,
    pub num_blocks_x: usize,
    pub num_blocks_y: usize,
    pub total_blocks: usize,
}

impl BlockPartition {
    pub fn new(
        raster_width: usize,
        raster_height: usize,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        let block_width = block_width.max(1);
        let block_height = block_height.max(1);

        // Calculate number of blocks needed (ceiling division)
        let num_blocks_x = raster_width.div_ceil(block_width);
        let num_blocks_y = raster_height.div_ceil(block_height);
        let total_blocks = num_blocks_x * num_blocks_y;

        debug!(
            "BlockPartition: {}x{} grid, block={}x{} → {}x{} blocks ({} total)",
            raster_width, raster_height, block_width, block_height, num_blocks_x, num_blocks_y, total_blocks
        );

        Self {
            raster_width,
            raster_height,
            block_width,
            block_height,
            num_blocks_x,
            num_blocks_y,
            total_blocks,
        }
    }

    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator::new(self)
    }

    /// Blocks in processing order: rows of blocks top to bottom, each row
    /// left to right.
    pub fn blocks(&self) -> Vec<BlockDefn> {
        self.iter().map(|(_, block)| block).collect()
    }

    pub fn get_block(&self, block_idx: usize) -> BlockDefn {
        // Convert linear index to 2D coordinates
        let block_y = block_idx / self.num_blocks_x;
        let block_x = block_idx % self.num_blocks_x;

        let left = block_x * self.block_width;
        let top = block_y * self.block_height;
        let right = ((block_x + 1) * self.block_width).min(self.raster_width);
        let bottom = ((block_y + 1) * self.block_height).min(self.raster_height);

        BlockDefn {
            top,
            left,
            nrows: bottom - top,
            ncols: right - left,
        }
    }
}

pub struct BlockIterator<'a> {
    partition: &'a BlockPartition,
    current_idx: usize,
}

impl<'a> BlockIterator<'a> {
    fn new(partition: &'a BlockPartition) -> Self {
        Self {
            partition,
            current_idx: 0,
        }
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = (usize, BlockDefn);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.partition.total_blocks {
            let block = self.partition.get_block(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, block))
        } else {
            None
        }
    }
}

use super::MammoResNet;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use log::debug;

/// Runs the forward pass on batch shards and stitches the outputs
///
/// Each view tensor is split along the batch dimension into at most
/// `shards` pieces; shard outputs are concatenated in order, so the result
/// lines up with the unsplit batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataParallel {
    shards: usize,
}

/// Replicates the forward pass over `gpu_count` batch shards
///
/// A count of 1 (or 0) runs the model unsharded.
pub fn make_parallel(gpu_count: usize) -> DataParallel {
    if gpu_count > 1 {
        debug!("Splitting every batch into {} shards", gpu_count);
    }
    DataParallel {
        shards: gpu_count.max(1),
    }
}

impl DataParallel {
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Logits for `views`, computed shard by shard
    pub fn forward<B: Backend>(
        &self,
        model: &MammoResNet<B>,
        views: Vec<Tensor<B, 4>>,
    ) -> Tensor<B, 2> {
        let batch = views.first().map(|v| v.dims()[0]).unwrap_or(0);
        let shards = self.shards.min(batch);
        if shards <= 1 {
            return model.forward(views);
        }

        let mut per_view: Vec<std::vec::IntoIter<Tensor<B, 4>>> = views
            .into_iter()
            .map(|v| v.chunk(shards, 0).into_iter())
            .collect();
        let mut outputs = Vec::with_capacity(shards);
        loop {
            let shard: Option<Vec<Tensor<B, 4>>> =
                per_view.iter_mut().map(Iterator::next).collect();
            match shard {
                Some(shard) => outputs.push(model.forward(shard)),
                None => break,
            }
        }
        Tensor::cat(outputs, 0)
    }
}

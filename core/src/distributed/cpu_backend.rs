use super::backend::CollectiveBackend;
use crate::error::{FlexError, Result};
use crate::tensor::{Tensor, TensorElem};
use crossbeam::channel::{Receiver, Sender, unbounded};

/// A tensor (or a chunk of one) in flight between two ranks.
///
/// Elements travel as `f64` so that one channel type serves every element type. `lossless` is
/// false when some value on the sending rank (or, for reductions, on any rank it heard from)
/// does not survive the trip through `f64`, e.g. an `i64` above 2^53. Receivers finish the
/// collective and then fail, so every rank reports the loss together.
#[derive(Debug, Clone)]
pub struct ShardMessage {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub lossless: bool,
}

impl ShardMessage {
    fn encode<T: TensorElem>(shape: &[usize], data: &[T]) -> Self {
        let mut lossless = true;
        let data = data
            .iter()
            .map(|&v| {
                let f = v.to_f64();
                lossless &= f.is_some_and(|f| survives_f64(v, f));
                f.unwrap_or(f64::NAN)
            })
            .collect();
        Self {
            shape: shape.to_vec(),
            data,
            lossless,
        }
    }

    fn decode<T: TensorElem>(self) -> Result<Tensor<T>> {
        let data = self
            .data
            .iter()
            .map(|&v| {
                T::from_f64(v).ok_or_else(|| {
                    FlexError::Collective(format!("value {v} does not fit the element type"))
                })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(Tensor::new(data, self.shape)?)
    }
}

/// Whether `v`, carried as `f`, converts back to exactly `v`. NaN counts as surviving.
fn survives_f64<T: TensorElem>(v: T, f: f64) -> bool {
    #[allow(clippy::eq_op)]
    let is_nan = v != v;
    match T::from_f64(f) {
        Some(back) => back == v || (is_nan && f.is_nan()),
        None => false,
    }
}

fn lossy_error(rank: usize) -> FlexError {
    FlexError::Collective(format!(
        "rank {rank}: tensor values cannot be carried through f64 without rounding"
    ))
}

/// A CPU collective backend: one instance per rank, each rank on its own thread.
///
/// Ranks form a ring over `crossbeam` channels. Every collective is a sequence of
/// `world_size - 1` steps in which each rank sends one message to its right neighbour and
/// receives one from its left neighbour, which is the data movement NCCL performs on GPUs.
#[derive(Debug)]
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<ShardMessage>, // Receive from rank - 1
    right_tx: Sender<ShardMessage>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<ShardMessage>,
        right_tx: Sender<ShardMessage>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Builds a fully wired ring of `world_size` backends, indexed by rank.
    ///
    /// Channel `i` connects rank `i` to rank `i + 1`: rank `i` sends on it and rank `i + 1`
    /// receives on it.
    pub fn ring(world_size: usize) -> Vec<CpuBackend> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        (0..world_size)
            .map(|rank| {
                let left = (rank + world_size - 1) % world_size;
                CpuBackend::new(rank, world_size, rxs[left].clone(), txs[rank].clone())
            })
            .collect()
    }

    fn send_right(&self, message: ShardMessage) -> Result<()> {
        self.right_tx.send(message).map_err(|_| {
            FlexError::Collective(format!("rank {}: right neighbour hung up", self.rank))
        })
    }

    fn recv_left(&self) -> Result<ShardMessage> {
        self.left_rx.recv().map_err(|_| {
            FlexError::Collective(format!("rank {}: left neighbour hung up", self.rank))
        })
    }

    /// Index of the chunk a rank handles at `step`, offset by `shift`, on the ring.
    fn ring_index(&self, step: usize, shift: isize) -> usize {
        (self.rank as isize - step as isize + shift).rem_euclid(self.world_size as isize) as usize
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        let encoded = ShardMessage::encode(tensor.shape(), tensor.data());
        let mut lossless = encoded.lossless;
        let mut data = encoded.data;
        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size.max(1));
        let chunk_bounds = |idx: usize| {
            let start = (idx * chunk_size).min(total_elements);
            let end = (start + chunk_size).min(total_elements);
            (start, end)
        };

        // Phase 1: scatter-reduce. Rank r sends chunk (r - step) and accumulates chunk
        // (r - step - 1) received from the left.
        for step in 0..self.world_size.saturating_sub(1) {
            let (start, end) = chunk_bounds(self.ring_index(step, 0));
            self.send_right(ShardMessage {
                shape: vec![end - start],
                data: data[start..end].to_vec(),
                lossless,
            })?;

            let received = self.recv_left()?;
            lossless &= received.lossless;
            let (recv_start, recv_end) = chunk_bounds(self.ring_index(step, -1));
            for (slot, val) in data[recv_start..recv_end].iter_mut().zip(received.data) {
                *slot += val;
            }
        }

        // Phase 2: all-gather. Each rank now owns one fully reduced chunk and passes it around.
        for step in 0..self.world_size.saturating_sub(1) {
            let (start, end) = chunk_bounds(self.ring_index(step, 1));
            self.send_right(ShardMessage {
                shape: vec![end - start],
                data: data[start..end].to_vec(),
                lossless,
            })?;

            let received = self.recv_left()?;
            lossless &= received.lossless;
            let (recv_start, recv_end) = chunk_bounds(self.ring_index(step, 0));
            for (slot, val) in data[recv_start..recv_end].iter_mut().zip(received.data) {
                *slot = val;
            }
        }

        if !lossless {
            return Err(lossy_error(self.rank));
        }
        ShardMessage {
            shape: tensor.shape().to_vec(),
            data,
            lossless,
        }
        .decode()
    }

    fn all_gather<T: TensorElem>(&self, tensor: &Tensor<T>, dim: usize) -> Result<Tensor<T>> {
        if dim >= tensor.rank() {
            return Err(crate::tensor::TensorError::IndexOutOfBounds {
                index: vec![dim],
                shape: tensor.shape().to_vec(),
            }
            .into());
        }

        let mut slots: Vec<Option<ShardMessage>> = vec![None; self.world_size];
        slots[self.rank] = Some(ShardMessage::encode(tensor.shape(), tensor.data()));

        // At `step` rank r forwards shard (r - step), which it owns or received last step, and
        // receives shard (r - step - 1).
        for step in 0..self.world_size.saturating_sub(1) {
            let outgoing = slots[self.ring_index(step, 0)].clone().ok_or_else(|| {
                FlexError::Collective(format!("rank {}: ring out of order", self.rank))
            })?;
            self.send_right(outgoing)?;
            slots[self.ring_index(step, -1)] = Some(self.recv_left()?);
        }

        // The ring is complete before any shape check, so a bad shard fails every rank together
        // instead of leaving a peer blocked on a message that never comes.
        let shards: Vec<ShardMessage> = slots.into_iter().flatten().collect();
        if shards.iter().any(|s| s.shape != tensor.shape()) {
            let size = shards
                .iter()
                .map(|s| s.shape.get(dim).copied().unwrap_or(0))
                .sum();
            return Err(FlexError::Sharding {
                dim,
                size,
                world_size: self.world_size,
            });
        }

        if shards.iter().any(|s| !s.lossless) {
            return Err(lossy_error(self.rank));
        }

        let parts = shards
            .into_iter()
            .map(ShardMessage::decode)
            .collect::<Result<Vec<Tensor<T>>>>()?;
        Ok(Tensor::cat(&parts, dim)?)
    }
}

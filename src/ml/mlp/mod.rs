//! Feed-forward binary classifier over TF-IDF rows.

mod adam;
mod model;
mod train;

pub use model::{Dense, SPAM_THRESHOLD, SpamNet, is_spam_probability, sigmoid};
pub use train::{EpochStats, TrainDataset, TrainOptions, TrainedNet, TrainingError, evaluate, train_spam_net};

//! Command-line configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mlbridge_host::{HostConfig, TestFlags, TrainFlags};

/// Default training data.
pub const DEFAULT_TRAIN_DATA: &str = ".data/mnist_train.csv";

/// Default test data.
pub const DEFAULT_TEST_DATA: &str = ".data/mnist_test.csv";

/// mlbridge - train and test models through the effect bridge
#[derive(Parser, Debug)]
#[command(name = "mlbridge")]
#[command(about = "Machine-learning trainer and tester", long_about = None)]
pub struct Cli {
    /// Directory receiving trained models
    #[arg(long, global = true, default_value = "models")]
    pub models_dir: PathBuf,

    /// Directory receiving test reports
    #[arg(long, global = true, default_value = "reports")]
    pub reports_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Artifact directories for the host.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            models_dir: self.models_dir.clone(),
            reports_dir: self.reports_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model on a CSV data file
    Train(TrainArgs),

    /// Evaluate a saved model on a CSV data file
    Test(TestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Training data file
    #[arg(long = "dataPath", visible_alias = "data-path", default_value = DEFAULT_TRAIN_DATA)]
    pub data_path: PathBuf,

    /// Use only the first N lines of the data
    #[arg(long = "dataLimit", visible_alias = "data-limit")]
    pub data_limit: Option<usize>,

    /// Gradient descent step size
    #[arg(long = "learningRate", visible_alias = "learning-rate", default_value_t = 0.01)]
    pub learning_rate: f64,

    /// Hidden layer activation
    #[arg(
        long = "activationFunction",
        visible_alias = "activation-function",
        default_value = "tanh"
    )]
    pub activation_function: String,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Hidden layer width; repeat for more layers
    #[arg(long, default_values_t = [100])]
    pub neurons: Vec<usize>,

    /// Run inside a background worker and print its progress
    #[arg(long)]
    pub background: bool,
}

impl TrainArgs {
    pub fn flags(&self) -> TrainFlags {
        TrainFlags {
            data_path: self.data_path.clone(),
            data_limit: self.data_limit,
            learning_rate: self.learning_rate,
            activation_function: self.activation_function.clone(),
            seed: self.seed,
            neurons: self.neurons.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    /// Saved model to evaluate
    #[arg(long = "modelPath", visible_alias = "model-path")]
    pub model_path: PathBuf,

    /// Test data file
    #[arg(long = "dataPath", visible_alias = "data-path", default_value = DEFAULT_TEST_DATA)]
    pub data_path: PathBuf,

    /// Use only the first N lines of the data
    #[arg(long = "dataLimit", visible_alias = "data-limit")]
    pub data_limit: Option<usize>,

    /// Run inside a background worker and print its progress
    #[arg(long)]
    pub background: bool,
}

impl TestArgs {
    pub fn flags(&self) -> TestFlags {
        TestFlags {
            model_path: self.model_path.clone(),
            data_path: self.data_path.clone(),
            data_limit: self.data_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_defaults() {
        let cli = Cli::parse_from(["mlbridge", "train"]);
        let Commands::Train(args) = cli.command else {
            panic!("Expected train");
        };

        let flags = args.flags();
        assert_eq!(flags.data_path, PathBuf::from(DEFAULT_TRAIN_DATA));
        assert_eq!(flags.data_limit, None);
        assert_eq!(flags.learning_rate, 0.01);
        assert_eq!(flags.activation_function, "tanh");
        assert_eq!(flags.seed, 42);
        assert_eq!(flags.neurons, vec![100]);
        assert_eq!(cli.models_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_train_repeated_neurons() {
        let cli = Cli::parse_from([
            "mlbridge",
            "train",
            "--neurons",
            "64",
            "--neurons",
            "32",
            "--dataLimit",
            "500",
            "--learning-rate",
            "0.1",
        ]);
        let Commands::Train(args) = cli.command else {
            panic!("Expected train");
        };

        assert_eq!(args.neurons, vec![64, 32]);
        assert_eq!(args.data_limit, Some(500));
        assert_eq!(args.learning_rate, 0.1);
    }

    #[test]
    fn test_test_requires_model_path() {
        assert!(Cli::try_parse_from(["mlbridge", "test"]).is_err());

        let cli = Cli::try_parse_from(["mlbridge", "test", "--modelPath", "models/m.json"]).unwrap();
        let Commands::Test(args) = cli.command else {
            panic!("Expected test");
        };
        assert_eq!(args.flags().data_path, PathBuf::from(DEFAULT_TEST_DATA));
    }
}

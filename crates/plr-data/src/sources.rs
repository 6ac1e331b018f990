use serde::{Deserialize, Serialize};
use std::fmt;

/// Mirrors serving the gzipped MNIST IDX files, tried in order.
pub const MNIST_MIRRORS: &[&str] = &[
    "https://ossci-datasets.s3.amazonaws.com/mnist/",
    "https://storage.googleapis.com/cvdf-datasets/mnist/",
    "http://yann.lecun.com/exdb/mnist/",
];

/// Which half of the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn images(self) -> MnistFile {
        match self {
            Split::Train => MnistFile::TrainImages,
            Split::Test => MnistFile::TestImages,
        }
    }

    pub fn labels(self) -> MnistFile {
        match self {
            Split::Train => MnistFile::TrainLabels,
            Split::Test => MnistFile::TestLabels,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Split::Train => "train",
            Split::Test => "test",
        };
        write!(f, "{}", s)
    }
}

/// The four raw files making up MNIST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MnistFile {
    TrainImages,
    TrainLabels,
    TestImages,
    TestLabels,
}

impl MnistFile {
    pub const ALL: [MnistFile; 4] = [
        MnistFile::TrainImages,
        MnistFile::TrainLabels,
        MnistFile::TestImages,
        MnistFile::TestLabels,
    ];

    /// File name as published on the mirrors (gzipped)
    pub fn file_name(self) -> &'static str {
        match self {
            MnistFile::TrainImages => "train-images-idx3-ubyte.gz",
            MnistFile::TrainLabels => "train-labels-idx1-ubyte.gz",
            MnistFile::TestImages => "t10k-images-idx3-ubyte.gz",
            MnistFile::TestLabels => "t10k-labels-idx1-ubyte.gz",
        }
    }

    pub fn is_images(self) -> bool {
        matches!(self, MnistFile::TrainImages | MnistFile::TestImages)
    }
}

impl fmt::Display for MnistFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Download source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    pub mirrors: Vec<String>,
    pub timeout_secs: u64,
}

impl DataSourceConfig {
    pub fn http(name: &str, mirrors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
            timeout_secs: 120,
        }
    }

    /// Full URL of `file` on the given mirror base
    pub fn url_for(mirror: &str, file: MnistFile) -> String {
        if mirror.ends_with('/') {
            format!("{}{}", mirror, file.file_name())
        } else {
            format!("{}/{}", mirror, file.file_name())
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self::http("mnist", MNIST_MIRRORS)
    }
}

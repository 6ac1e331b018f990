use std::fmt;

/// Which backend a session trains on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cpu,
    Gpu,
}

impl Accelerator {
    /// GPU when the crate is built with the `gpu` feature and `no_cuda` is
    /// not set; CPU otherwise.
    pub fn select(no_cuda: bool) -> Self {
        if !no_cuda && Self::gpu_compiled() {
            Accelerator::Gpu
        } else {
            Accelerator::Cpu
        }
    }

    pub fn gpu_compiled() -> bool {
        cfg!(feature = "gpu")
    }

    pub fn is_accelerated(self) -> bool {
        self == Accelerator::Gpu
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Cpu => write!(f, "cpu"),
            Accelerator::Gpu => write!(f, "gpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cuda_forces_cpu() {
        assert_eq!(Accelerator::select(true), Accelerator::Cpu);
        assert!(!Accelerator::select(true).is_accelerated());
    }

    #[test]
    fn gpu_only_when_compiled_in() {
        let expected = if Accelerator::gpu_compiled() {
            Accelerator::Gpu
        } else {
            Accelerator::Cpu
        };
        assert_eq!(Accelerator::select(false), expected);
    }
}

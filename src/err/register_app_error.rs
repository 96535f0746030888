/// Error when registering an application helper.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegisterAppError {
    /// A helper is already registered for the given port (at most one
    /// helper per port).
    PortInUse { port: u16 },
}

impl core::fmt::Display for RegisterAppError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use RegisterAppError::*;
        match self {
            PortInUse { port } => write!(
                f,
                "Application Helper Error: a helper is already registered for port {port}."
            ),
        }
    }
}

impl std::error::Error for RegisterAppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::RegisterAppError::*;
    use std::error::Error;

    #[test]
    fn debug() {
        assert_eq!(
            "PortInUse { port: 21 }",
            format!("{:?}", PortInUse { port: 21 })
        );
    }

    #[test]
    fn clone_eq() {
        let err = PortInUse { port: 21 };
        assert_eq!(err, err.clone());
    }

    #[test]
    fn fmt() {
        assert_eq!(
            "Application Helper Error: a helper is already registered for port 21.",
            format!("{}", PortInUse { port: 21 })
        );
    }

    #[test]
    fn source() {
        assert!(PortInUse { port: 21 }.source().is_none());
    }
}

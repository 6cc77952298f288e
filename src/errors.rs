
error_chain! {
    errors {
        #[doc = "Missing or malformed calibration and settings."]
        Config(msg: ::std::string::String) {
            description("invalid configuration")
            display("configuration error: {}", msg)
        }
        #[doc = "The gamepad is gone or never showed up."]
        DeviceUnavailable(msg: ::std::string::String) {
            description("input device unavailable")
            display("input device unavailable: {}", msg)
        }
        #[doc = "The serial link to the board failed."]
        Link(msg: ::std::string::String) {
            description("board link failure")
            display("board link failure: {}", msg)
        }
    }
}

impl Error {
    /// Faults that end a running control loop.
    pub fn is_fault(&self) -> bool {
        match *self.kind() {
            ErrorKind::DeviceUnavailable(_) | ErrorKind::Link(_) => true,
            _ => false,
        }
    }
}

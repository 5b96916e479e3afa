/// Route definitions shared by the server, the ctl tool and tests.
pub mod vending {
    pub const SESSION_CREATE: &str = "/session/create";
    pub const STATUS: &str = "/status/{machine_id}";
    pub const LOCK: &str = "/lock";
    pub const BUY: &str = "/buy";

    /// Concrete status path for one machine.
    pub fn status_path(machine_id: &str) -> String {
        STATUS.replace("{machine_id}", machine_id)
    }
}

pub mod hardware {
    pub const COIN: &str = "/hardware/coin";
}

pub mod health {
    pub const PING: &str = "/ping";
    pub const HEALTH: &str = "/health";
}

/// Header carrying the session token on status requests.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Query parameter alternative to [`SESSION_TOKEN_HEADER`].
pub const SESSION_TOKEN_QUERY: &str = "sessionToken";

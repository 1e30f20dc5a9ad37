/// Types implementing WireSerialisable can be sent over the TCP connection
/// in the server -> client direction.
pub trait WireSerialisable {
    /// Converts the value in question to its on-the-wire byte form.
    fn serialise_wire(&self) -> Vec<u8>;
}

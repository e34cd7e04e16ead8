/// Provider Module (Windows only)
///
/// The COM/OLE DB layer that talks to the MSOLAP provider. Everything
/// unsafe lives here: COM apartment lifetime, interface acquisition,
/// property-set plumbing, accessor creation and raw VARIANT decoding. The
/// interface smart pointers generated by the `windows` crate give each
/// acquired interface single-release semantics; this module's job is to
/// acquire them in the right order, release them in reverse and convert
/// every HRESULT into a typed error.
mod com;
mod oledb;

pub use com::ComGuard;
pub use oledb::{decode_variant_slot, OleDbConnection, OleDbStatement};

// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing a retrieval run:
//
//   pair.rs    — one annotation row (anchor image + positive),
//                the retrieval task, the prompt flavour and
//                the dataset split
//   traits.rs  — abstractions the data layer implements
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain structs, enums, and traits

pub mod pair;

pub mod traits;

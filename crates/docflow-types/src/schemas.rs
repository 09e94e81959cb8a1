//! Embedded JSON Schema documents for the wire and marker shapes. Sources live under `schemas/`.

macro_rules! embed_schema {
    ($($const:ident => $path:literal),+ $(,)?) => {
        $(pub const $const: &str = include_str!($path);)+

        pub const ALL: &[SchemaDoc] = &[
            $(SchemaDoc { name: stringify!($const), json: $const },)+
        ];
    };
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaDoc {
    pub name: &'static str,
    pub json: &'static str,
}

embed_schema! {
    PATCH => "../schemas/patch.schema.json",
    CHECKPOINT => "../schemas/checkpoint.schema.json",
    FAILURE => "../schemas/failure.schema.json",
    TERMINATION => "../schemas/termination.schema.json",
    INITIALIZATION => "../schemas/initialization.schema.json",
    DOCUMENT_UPDATE => "../schemas/document-update.schema.json",
}

pub fn find(name: &str) -> Option<&'static str> {
    ALL.iter()
        .find(|doc| doc.name.eq_ignore_ascii_case(name))
        .map(|doc| doc.json)
}

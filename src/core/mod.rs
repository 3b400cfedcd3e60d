pub mod cmap;
pub mod content_stream;
pub mod decode;
pub mod document;
pub mod encoding;
pub mod error;
pub mod lexer;
pub mod page;
pub mod parser;
pub mod stream;
pub mod structure;
pub mod xref;

pub use cmap::CMap;
pub use content_stream::{ContentInterpreter, OpCode, OutputMode, PlacedImage, TextSpan};
pub use document::{
    DocumentConfig, FormField, Link, Metadata, OutlineItem, PDFDocument, SearchResult,
};
pub use encoding::{FontCache, FontEncoding, decode_text_string};
pub use error::{ErrorKind, ErrorPolicy, ErrorRecord, ErrorSink, PDFError, PDFResult};
pub use lexer::{Lexer, Token};
pub use page::Page;
pub use parser::{Dict, PDFObject, Parser, Ref};
pub use stream::{ByteSource, Stream};
pub use structure::{StructChild, StructElem, StructureTree};
pub use xref::{XRef, XRefEntry};

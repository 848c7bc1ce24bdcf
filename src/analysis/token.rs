/// Token representation
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,   // The token text
    pub position: u32,  // Position in the field (for phrase queries)
    pub offset: usize,  // Byte offset in original text
}

impl Token {
    pub fn new(text: String, position: u32, offset: usize) -> Self {
        Token { text, position, offset }
    }
}

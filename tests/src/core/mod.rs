mod crypto;
mod xml;

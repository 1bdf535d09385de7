mod encryption;
mod multidex;

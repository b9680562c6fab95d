mod strategies;
mod support;

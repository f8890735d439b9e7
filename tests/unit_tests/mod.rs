mod condense;
mod constraints;
mod pattern;

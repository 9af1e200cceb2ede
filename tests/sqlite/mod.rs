mod catalog;
mod embed;
mod filters;
mod isolation;
mod raw;
mod timeout;

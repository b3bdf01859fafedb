pub mod activation;

pub mod attention;

pub mod dropout;

pub mod embeddings;

pub mod feedforward;

pub mod identity;

pub mod build_module;

pub mod layer_norm;

pub mod transformer;

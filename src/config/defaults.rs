//! Default values for configuration

pub fn default_qdrant_url() -> String {
    "http://127.0.0.1:6333".to_string()
}

pub fn default_collection_name() -> String {
    "movesia".to_string()
}

pub fn default_ready_timeout_secs() -> u64 {
    15
}

pub fn default_embedding_url() -> String {
    "http://127.0.0.1:8876".to_string()
}

pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

pub fn default_embedding_dimension() -> usize {
    384
}

pub fn default_embedding_batch_size() -> usize {
    32
}

pub fn default_script_target_tokens() -> usize {
    500
}

pub fn default_script_overlap_lines() -> usize {
    20
}

pub fn default_scene_target_tokens() -> usize {
    700
}

pub fn default_scene_overlap_lines() -> usize {
    30
}
